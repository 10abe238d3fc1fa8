// Shared fixtures for the bridge integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use afero_core::testing::{FakeCredentials, FakeTransport, named_lamp_json};
use afero_core::{Bridge, BridgeConfig};

pub type TestBridge = Bridge<Arc<FakeTransport>, Arc<FakeCredentials>>;

pub fn lamp(id: &str, name: &str, power: &str, brightness: i64) -> serde_json::Value {
    named_lamp_json(id, name, power, brightness)
}

pub fn fake_cloud(devices: Vec<serde_json::Value>) -> Arc<FakeTransport> {
    FakeTransport::with_listing(devices)
}

pub fn bridge(cloud: &Arc<FakeTransport>) -> TestBridge {
    bridge_with(cloud, BridgeConfig::default())
}

pub fn bridge_with(cloud: &Arc<FakeTransport>, config: BridgeConfig) -> TestBridge {
    match Bridge::new(Arc::clone(cloud), Arc::new(FakeCredentials::default()), config) {
        Ok(bridge) => bridge,
        Err(e) => panic!("bridge construction failed: {e}"),
    }
}
