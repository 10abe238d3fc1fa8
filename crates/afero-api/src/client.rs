// Afero API HTTP client
//
// Wraps `reqwest::Client` with bearer-token injection, status
// classification, and account id discovery. Endpoint families live in
// separate files as inherent methods (see `metadevices.rs`).

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::UserInfo;
use crate::transport::{Endpoints, TransportConfig};

/// Raw HTTP client for the Afero cloud API.
///
/// Every call takes the bearer token explicitly; token lifetime is owned by
/// [`AferoAuth`](crate::auth::AferoAuth), not by this client.
pub struct AferoClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    account_id: OnceCell<String>,
}

impl AferoClient {
    /// Create a client for the vendor selected in `transport`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let endpoints = transport.endpoints()?;
        Ok(Self::with_client(http, endpoints))
    }

    /// Create a client with a pre-built `reqwest::Client` and explicit endpoints.
    pub fn with_client(http: reqwest::Client, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            account_id: OnceCell::new(),
        }
    }

    /// The underlying HTTP client (shared with the token refresher).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Look up (once per client) the account id attached to this login.
    ///
    /// `GET {api}/v1/users/me`
    pub async fn account_id(&self, token: &SecretString) -> Result<&str, Error> {
        let id = self
            .account_id
            .get_or_try_init(|| async {
                let url = self.endpoints.api_base.join("/v1/users/me")?;
                debug!("querying account id");
                let info: UserInfo = self.get(url, token).await?;
                info.account_access
                    .into_iter()
                    .next()
                    .map(|access| access.account.account_id)
                    .ok_or(Error::MissingAccount)
            })
            .await?;
        Ok(id.as_str())
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send an authenticated GET and decode the JSON body.
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &SecretString,
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::parse_response(resp).await
    }

    /// Send an authenticated PUT with a JSON body and decode the JSON reply.
    pub(crate) async fn put<T: DeserializeOwned>(
        &self,
        url: Url,
        token: &SecretString,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("PUT {}", url);

        let resp = self
            .http
            .put(url)
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::parse_response(resp).await
    }

    /// Classify the status code, then decode the body.
    async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();

        match status.as_u16() {
            401 | 403 => {
                return Err(Error::Authentication {
                    message: format!("API rejected the access token (HTTP {})", status.as_u16()),
                });
            }
            429 => {
                let retry_after_secs = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(Error::RateLimited { retry_after_secs });
            }
            503 => {
                return Err(Error::Unavailable {
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        // Some state writes answer with an empty body.
        let body_ref = if body.trim().is_empty() { "null" } else { body.as_str() };

        serde_json::from_str(body_ref).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })
    }
}
