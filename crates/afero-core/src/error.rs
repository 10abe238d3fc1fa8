// ── Core error types ──
//
// User-facing errors from afero-core. Consumers never see HTTP status codes
// or JSON parse failures directly: `afero_api::Error` is translated into
// `TransportError` / `AuthError` at the port boundary, and those surface as
// `CoreError`.

use thiserror::Error;

use crate::model::DomainError;

/// Failure reported by a `Transport` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The bearer token was rejected. Triggers a credential refresh.
    #[error("access token rejected: {0}")]
    Unauthorized(String),

    #[error("rate limited by the API")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("service unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Worth retrying after a delay.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable { .. } => {
                true
            }
            Self::Rejected { status, .. } => *status >= 500,
            Self::Unauthorized(_) | Self::Malformed(_) => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Failure reported by a `CredentialProvider`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The identity provider refused the credentials; re-login required.
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// The identity provider could not be reached.
    #[error("credential provider unavailable: {0}")]
    Unavailable(String),
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed payload{}: {reason}", device_suffix(.device_id.as_deref()))]
    MalformedPayload {
        device_id: Option<String>,
        reason: String,
    },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Resource not found: {device_id}/{resource_id}")]
    ResourceNotFound {
        device_id: String,
        resource_id: String,
    },

    #[error("Function not found: {target}")]
    FunctionNotFound { target: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Invalid value for {target}: {reason}")]
    DomainViolation { target: String, reason: DomainError },

    #[error("Command to {target} failed after {attempts} attempt(s): {reason}")]
    CommandFailed {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("Command to {target} was cancelled")]
    Cancelled { target: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Bridge is stopped")]
    BridgeStopped,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` if the failure came from rejected credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Auth(AuthError::Rejected(_)))
            || matches!(self, Self::Transport(e) if e.is_unauthorized())
    }

    /// `true` for connectivity failures the poller should back off from.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::Auth(AuthError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

fn device_suffix(device_id: Option<&str>) -> String {
    device_id.map(|d| format!(" for device {d}")).unwrap_or_default()
}

// ── Conversion from API-layer errors ─────────────────────────────────

impl From<afero_api::Error> for TransportError {
    fn from(err: afero_api::Error) -> Self {
        use afero_api::Error as ApiError;

        match err {
            ApiError::Authentication { message } => Self::Unauthorized(message),
            ApiError::NoRefreshToken => Self::Unauthorized("no refresh token available".into()),
            ApiError::Transport(e) => {
                if e.is_timeout() {
                    Self::Timeout
                } else {
                    Self::Network(e.to_string())
                }
            }
            ApiError::InvalidUrl(e) => Self::Network(format!("invalid URL: {e}")),
            ApiError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            ApiError::Unavailable { status } => Self::Unavailable { status },
            ApiError::Api { status, message } => Self::Rejected { status, message },
            ApiError::Deserialization { message, .. } => Self::Malformed(message),
            ApiError::MissingAccount => Self::Malformed("login has no account attached".into()),
        }
    }
}

impl From<afero_api::Error> for AuthError {
    fn from(err: afero_api::Error) -> Self {
        if err.is_auth_expired() {
            Self::Rejected(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_transport_taxonomy() {
        let auth: TransportError = afero_api::Error::Authentication {
            message: "HTTP 403".into(),
        }
        .into();
        assert!(auth.is_unauthorized());
        assert!(!auth.is_transient());

        let busy: TransportError = afero_api::Error::Unavailable { status: 503 }.into();
        assert!(busy.is_transient());

        let bad: TransportError = afero_api::Error::Api {
            status: 400,
            message: "bad value".into(),
        }
        .into();
        assert!(!bad.is_transient());
    }

    #[test]
    fn refresh_failures_distinguish_rejection_from_outage() {
        let rejected: AuthError = afero_api::Error::Authentication {
            message: "invalid_grant".into(),
        }
        .into();
        assert!(matches!(rejected, AuthError::Rejected(_)));

        let outage: AuthError = afero_api::Error::Api {
            status: 502,
            message: String::new(),
        }
        .into();
        assert!(matches!(outage, AuthError::Unavailable(_)));
        assert!(CoreError::Auth(outage).is_transient());
    }

    #[test]
    fn malformed_payload_mentions_device() {
        let err = CoreError::MalformedPayload {
            device_id: Some("lamp-1".into()),
            reason: "missing id".into(),
        };
        assert_eq!(err.to_string(), "Malformed payload for device lamp-1: missing id");
    }
}
