use thiserror::Error;

/// Top-level error type for the `afero-api` crate.
///
/// Covers every failure mode of the HTTP surface: token acquisition,
/// transport, HTTP status classification, and payload decoding.
/// `afero-core` maps these into its transport/auth taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Token endpoint rejected the refresh token, or the API answered 401/403.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// No refresh token is available to mint an access token.
    #[error("No refresh token available -- log in again")]
    NoRefreshToken,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The API asked us to slow down (HTTP 429).
    #[error("Rate limited by the Afero API")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The API is temporarily unavailable (HTTP 503).
    #[error("Afero API temporarily unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    /// Any other non-success status.
    #[error("Afero API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// `/v1/users/me` returned no account for this login.
    #[error("No Afero account is associated with this login")]
    MissingAccount,
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and a token refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NoRefreshToken)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RateLimited { .. } | Self::Unavailable { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the request timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
