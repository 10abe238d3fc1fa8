// OpenID token lifecycle for the Afero cloud.
//
// The interactive username/password login lives outside this crate; we
// start from a refresh token and mint access tokens from it, keeping any
// rotated refresh token the server hands back.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::TokenResponse;
use crate::transport::Endpoints;

/// Refresh the access token when it expires within this window.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Access tokens without an `expires_in` are assumed to last this long.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 120;

/// A minted access token plus the refresh token that produced it.
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl TokenData {
    /// `true` if the access token is expired or expires within `skew`.
    pub fn is_expiring(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }
}

struct AuthState {
    refresh_token: Option<SecretString>,
    token: Option<TokenData>,
}

/// Produces bearer tokens on demand and refreshes them on expiry.
///
/// Refreshes are serialized: concurrent callers wait on the same mutex and
/// reuse the freshly minted token.
pub struct AferoAuth {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    state: Mutex<AuthState>,
}

impl AferoAuth {
    pub fn new(http: reqwest::Client, endpoints: &Endpoints, refresh_token: SecretString) -> Self {
        Self {
            http,
            token_url: endpoints.token_url.clone(),
            client_id: endpoints.client_id.clone(),
            state: Mutex::new(AuthState {
                refresh_token: Some(refresh_token),
                token: None,
            }),
        }
    }

    /// Seed the provider with an already-minted token.
    pub fn with_token_data(http: reqwest::Client, endpoints: &Endpoints, data: TokenData) -> Self {
        Self {
            http,
            token_url: endpoints.token_url.clone(),
            client_id: endpoints.client_id.clone(),
            state: Mutex::new(AuthState {
                refresh_token: Some(data.refresh_token.clone()),
                token: Some(data),
            }),
        }
    }

    /// Return a valid access token, refreshing it first if it is about to expire.
    pub async fn token(&self) -> Result<SecretString, Error> {
        let mut state = self.state.lock().await;
        if let Some(ref data) = state.token {
            if !data.is_expiring(Duration::seconds(EXPIRY_SKEW_SECS)) {
                return Ok(data.access_token.clone());
            }
            debug!("access token expiring, refreshing");
        }
        self.refresh_locked(&mut state).await
    }

    /// Force a refresh, regardless of the current token's expiry.
    pub async fn refresh(&self) -> Result<SecretString, Error> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// The refresh token currently held (it may have been rotated).
    pub async fn refresh_token(&self) -> Option<SecretString> {
        self.state.lock().await.refresh_token.clone()
    }

    /// Drop the cached access token so the next call must refresh.
    pub async fn invalidate(&self) {
        self.state.lock().await.token = None;
    }

    async fn refresh_locked(&self, state: &mut AuthState) -> Result<SecretString, Error> {
        let refresh_token = state.refresh_token.clone().ok_or(Error::NoRefreshToken)?;

        debug!("POST {}", self.token_url);
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.expose_secret()),
            ("scope", "openid email offline_access profile"),
        ];
        let resp = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status.is_client_error() {
            warn!(status = status.as_u16(), "token endpoint rejected refresh token");
            state.token = None;
            return Err(Error::Authentication {
                message: format!("token refresh rejected (HTTP {})", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: String::new(),
            })?;

        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let rotated = parsed
            .refresh_token
            .map_or(refresh_token, SecretString::from);
        let access = SecretString::from(parsed.access_token);

        state.refresh_token = Some(rotated.clone());
        state.token = Some(TokenData {
            access_token: access.clone(),
            refresh_token: rotated,
            expires_at: Utc::now() + Duration::seconds(lifetime),
        });
        debug!(expires_in = lifetime, "access token refreshed");

        Ok(access)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::single_host("http://127.0.0.1:9", "test-client").unwrap()
    }

    #[test]
    fn seeded_token_is_served_without_refresh() {
        let auth = AferoAuth::with_token_data(
            reqwest::Client::new(),
            &endpoints(),
            TokenData {
                access_token: SecretString::from("seeded".to_string()),
                refresh_token: SecretString::from("refresh-1".to_string()),
                expires_at: Utc::now() + Duration::hours(1),
            },
        );

        let access = tokio_test::block_on(auth.token()).unwrap();
        assert_eq!(access.expose_secret(), "seeded");
        let refresh = tokio_test::block_on(auth.refresh_token()).unwrap();
        assert_eq!(refresh.expose_secret(), "refresh-1");
    }

    #[test]
    fn invalidate_keeps_refresh_token() {
        let auth = AferoAuth::new(
            reqwest::Client::new(),
            &endpoints(),
            SecretString::from("refresh-1".to_string()),
        );
        tokio_test::block_on(auth.invalidate());
        let refresh = tokio_test::block_on(auth.refresh_token()).unwrap();
        assert_eq!(refresh.expose_secret(), "refresh-1");
    }

    #[test]
    fn token_expiry_respects_skew() {
        let data = TokenData {
            access_token: SecretString::from("a".to_string()),
            refresh_token: SecretString::from("r".to_string()),
            expires_at: Utc::now() + Duration::seconds(30),
        };
        assert!(data.is_expiring(Duration::seconds(60)));
        assert!(!data.is_expiring(Duration::seconds(5)));
    }
}
