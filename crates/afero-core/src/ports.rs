// ── Collaborator ports ──
//
// The core consumes a `Transport` (fetch the device listing, send a state
// write) and a `CredentialProvider` (bearer tokens). Both are implemented
// here for the afero-api types; tests substitute in-memory fakes.

use std::future::Future;
use std::sync::Arc;

use afero_api::{AferoAuth, AferoClient, StateValue};
use chrono::Utc;
use secrecy::SecretString;

use crate::convert::DEFAULT_RESOURCE;
use crate::error::{AuthError, TransportError};
use crate::model::{FunctionKey, Value};

/// A single function write.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub device_id: String,
    pub resource_id: String,
    pub function_id: String,
    pub value: Value,
}

impl CommandRequest {
    pub fn new(key: &FunctionKey, value: Value) -> Self {
        Self {
            device_id: key.device_id.clone(),
            resource_id: key.resource_id.clone(),
            function_id: key.function_id.clone(),
            value,
        }
    }
}

/// Network access to the device cloud.
pub trait Transport: Send + Sync + 'static {
    /// Fetch every device with its current state, as raw JSON entries.
    fn fetch_devices(
        &self,
        token: &SecretString,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, TransportError>> + Send;

    /// Write one function value; returns the raw acknowledgement body.
    fn send_command(
        &self,
        token: &SecretString,
        command: &CommandRequest,
    ) -> impl Future<Output = Result<serde_json::Value, TransportError>> + Send;
}

/// Source of bearer tokens.
pub trait CredentialProvider: Send + Sync + 'static {
    /// A currently valid token (may refresh transparently).
    fn token(&self) -> impl Future<Output = Result<SecretString, AuthError>> + Send;

    /// Force a refresh after the API rejected the current token.
    fn refresh(&self) -> impl Future<Output = Result<SecretString, AuthError>> + Send;
}

// ── Shared handles ──────────────────────────────────────────────────

impl<T: Transport> Transport for Arc<T> {
    fn fetch_devices(
        &self,
        token: &SecretString,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, TransportError>> + Send {
        (**self).fetch_devices(token)
    }

    fn send_command(
        &self,
        token: &SecretString,
        command: &CommandRequest,
    ) -> impl Future<Output = Result<serde_json::Value, TransportError>> + Send {
        (**self).send_command(token, command)
    }
}

impl<C: CredentialProvider> CredentialProvider for Arc<C> {
    fn token(&self) -> impl Future<Output = Result<SecretString, AuthError>> + Send {
        (**self).token()
    }

    fn refresh(&self) -> impl Future<Output = Result<SecretString, AuthError>> + Send {
        (**self).refresh()
    }
}

// ── Afero cloud ─────────────────────────────────────────────────────

impl Transport for AferoClient {
    async fn fetch_devices(
        &self,
        token: &SecretString,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        Ok(self.list_metadevices(token).await?)
    }

    async fn send_command(
        &self,
        token: &SecretString,
        command: &CommandRequest,
    ) -> Result<serde_json::Value, TransportError> {
        let instance =
            (command.resource_id != DEFAULT_RESOURCE).then(|| command.resource_id.clone());
        let values = vec![StateValue {
            function_class: command.function_id.clone(),
            function_instance: instance,
            value: command.value.to_json(),
            last_update_time: Some(Utc::now().timestamp_millis()),
        }];
        Ok(self.put_state(token, &command.device_id, values).await?)
    }
}

impl CredentialProvider for AferoAuth {
    async fn token(&self) -> Result<SecretString, AuthError> {
        Ok(AferoAuth::token(self).await?)
    }

    async fn refresh(&self) -> Result<SecretString, AuthError> {
        Ok(AferoAuth::refresh(self).await?)
    }
}
