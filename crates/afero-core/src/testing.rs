// ── Test fixtures ──
//
// Metadevice JSON builders and scripted in-memory ports, shared by the unit
// tests and (through the `test-util` feature) the integration tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;

use crate::error::{AuthError, TransportError};
use crate::ports::{CommandRequest, CredentialProvider, Transport};

/// A lamp with `power` (on/off) and `brightness` (0..=100).
pub fn lamp_json(id: &str, power: &str, brightness: i64) -> serde_json::Value {
    named_lamp_json(id, &format!("Lamp {id}"), power, brightness)
}

pub fn named_lamp_json(id: &str, name: &str, power: &str, brightness: i64) -> serde_json::Value {
    json!({
        "id": id,
        "typeId": "metadevice.device",
        "friendlyName": name,
        "description": {
            "device": { "deviceClass": "light", "manufacturerName": "Acme", "model": "A19" },
            "functions": [
                { "functionClass": "power", "type": "category",
                  "values": [{ "name": "on" }, { "name": "off" }] },
                { "functionClass": "brightness", "type": "numeric",
                  "values": [{ "name": "brightness", "range": { "min": 0, "max": 100, "step": 1 } }] }
            ]
        },
        "state": { "values": [
            { "functionClass": "power", "value": power },
            { "functionClass": "brightness", "value": brightness }
        ]}
    })
}

pub fn lamp_payload(lamps: &[(&str, &str, i64)]) -> Vec<serde_json::Value> {
    lamps
        .iter()
        .map(|(id, power, level)| lamp_json(id, power, *level))
        .collect()
}

/// In-memory stand-in for the Afero cloud.
///
/// Fetches serve `fetch_script` first, then `listing`. Commands fail with
/// `command_failure` if set, otherwise serve `command_script`, then echo
/// the requested value. Latencies apply to every call.
#[derive(Default)]
pub struct FakeTransport {
    pub listing: Mutex<Vec<serde_json::Value>>,
    pub fetch_script: Mutex<VecDeque<Result<Vec<serde_json::Value>, TransportError>>>,
    pub command_script: Mutex<VecDeque<Result<serde_json::Value, TransportError>>>,
    pub command_failure: Mutex<Option<TransportError>>,
    pub fetch_latency: Mutex<Option<Duration>>,
    pub command_latency: Mutex<Option<Duration>>,
    pub commands: Mutex<Vec<CommandRequest>>,
    pub fetches: AtomicU32,
}

impl FakeTransport {
    pub fn with_listing(listing: Vec<serde_json::Value>) -> Arc<Self> {
        let fake = Self::default();
        *fake.listing.lock() = listing;
        Arc::new(fake)
    }

    pub fn set_listing(&self, listing: Vec<serde_json::Value>) {
        *self.listing.lock() = listing;
    }

    pub fn script_fetch(&self, result: Result<Vec<serde_json::Value>, TransportError>) {
        self.fetch_script.lock().push_back(result);
    }

    pub fn script_command(&self, result: Result<serde_json::Value, TransportError>) {
        self.command_script.lock().push_back(result);
    }

    /// Fail every command with `err` from now on.
    pub fn fail_commands(&self, err: TransportError) {
        *self.command_failure.lock() = Some(err);
    }

    pub fn set_fetch_latency(&self, latency: Duration) {
        *self.fetch_latency.lock() = Some(latency);
    }

    pub fn set_command_latency(&self, latency: Duration) {
        *self.command_latency.lock() = Some(latency);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> usize {
        self.commands.lock().len()
    }
}

impl Transport for FakeTransport {
    async fn fetch_devices(
        &self,
        _token: &SecretString,
    ) -> Result<Vec<serde_json::Value>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let latency = *self.fetch_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self.fetch_script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.listing.lock().clone()))
    }

    async fn send_command(
        &self,
        _token: &SecretString,
        command: &CommandRequest,
    ) -> Result<serde_json::Value, TransportError> {
        self.commands.lock().push(command.clone());
        let latency = *self.command_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.command_failure.lock().clone() {
            return Err(err);
        }
        let scripted = self.command_script.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(json!({
                "metadeviceId": command.device_id,
                "values": [{
                    "functionClass": command.function_id,
                    "value": command.value.to_json()
                }]
            }))
        })
    }
}

/// Credential provider counting refreshes; optionally refuses them.
#[derive(Default)]
pub struct FakeCredentials {
    pub refreshes: AtomicU32,
    pub reject_refresh: bool,
}

impl CredentialProvider for FakeCredentials {
    async fn token(&self) -> Result<SecretString, AuthError> {
        Ok(SecretString::from("token".to_string()))
    }

    async fn refresh(&self) -> Result<SecretString, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.reject_refresh {
            Err(AuthError::Rejected("refresh token revoked".into()))
        } else {
            Ok(SecretString::from("fresh".to_string()))
        }
    }
}
