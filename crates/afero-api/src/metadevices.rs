// Metadevice endpoints
//
// Full device listing with state expansion (read) and per-device state
// writes (commands).

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::client::AferoClient;
use crate::error::Error;
use crate::models::{StateUpdate, StateValue};

impl AferoClient {
    /// List every metadevice on the account, with current state.
    ///
    /// `GET {data}/v1/accounts/{account}/metadevices?expansions=state`
    ///
    /// Entries are returned undecoded so the caller can isolate a malformed
    /// device instead of failing the whole listing.
    pub async fn list_metadevices(&self, token: &SecretString) -> Result<Vec<Value>, Error> {
        let account = self.account_id(token).await?.to_owned();
        let mut url = self
            .endpoints()
            .data_base
            .join(&format!("/v1/accounts/{account}/metadevices"))?;
        url.query_pairs_mut().append_pair("expansions", "state");

        let body: Value = self.get(url, token).await?;
        match body {
            Value::Array(devices) => {
                debug!(count = devices.len(), "listed metadevices");
                Ok(devices)
            }
            other => Err(Error::Deserialization {
                message: "expected a JSON array of metadevices".into(),
                body: other.to_string(),
            }),
        }
    }

    /// Write one or more function values to a metadevice.
    ///
    /// `PUT {api}/v1/accounts/{account}/metadevices/{device}/state`
    ///
    /// Returns the raw response body, which normally echoes the accepted
    /// `values`.
    pub async fn put_state(
        &self,
        token: &SecretString,
        device_id: &str,
        values: Vec<StateValue>,
    ) -> Result<Value, Error> {
        let account = self.account_id(token).await?.to_owned();
        let url = self
            .endpoints()
            .api_base
            .join(&format!("/v1/accounts/{account}/metadevices/{device_id}/state"))?;
        debug!(device_id, count = values.len(), "writing device state");

        let body = StateUpdate {
            metadevice_id: device_id.to_owned(),
            values,
        };
        self.put(url, token, &body).await
    }
}
