// Wire types for the Afero metadevice API.
//
// Metadevice state and function lists are kept as raw `serde_json::Value`
// entries and decoded one at a time, so a single malformed entry never
// poisons the rest of the device.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A metadevice as returned by `GET /v1/accounts/{id}/metadevices?expansions=state`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDevice {
    pub id: String,
    /// Physical device id shared by a parent and its children.
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub state: DeviceStateValues,
    #[serde(default)]
    pub children: Vec<String>,
}

impl MetaDevice {
    /// Decode each function descriptor independently.
    pub fn functions(&self) -> impl Iterator<Item = Result<FunctionDescriptor, serde_json::Error>> {
        self.description
            .functions
            .iter()
            .map(|raw| serde_json::from_value(raw.clone()))
    }

    /// Decode each state value independently.
    pub fn state_values(&self) -> impl Iterator<Item = Result<StateValue, serde_json::Error>> {
        self.state
            .values
            .iter()
            .map(|raw| serde_json::from_value(raw.clone()))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    #[serde(default)]
    pub device: DeviceInfo,
    #[serde(default)]
    pub default_image: Option<String>,
    #[serde(default)]
    pub functions: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub default_name: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceStateValues {
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Declared capability of a metadevice (`description.functions[]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDescriptor {
    pub function_class: String,
    #[serde(default)]
    pub function_instance: Option<String>,
    /// `category`, `numeric`, ... -- other shapes exist and are opaque to us.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub values: Vec<FunctionValueDescriptor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionValueDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub range: Option<ValueRange>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub step: Option<f64>,
}

/// A single reported (or requested) function value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateValue {
    pub function_class: String,
    #[serde(default)]
    pub function_instance: Option<String>,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<i64>,
}

/// Body of `PUT /v1/accounts/{id}/metadevices/{device}/state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub metadevice_id: String,
    pub values: Vec<StateValue>,
}

/// Response of `GET /v1/users/me` (only the fields we need).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserInfo {
    #[serde(default)]
    pub account_access: Vec<AccountAccess>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AccountAccess {
    pub account: Account,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Account {
    pub account_id: String,
}

/// OpenID token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_metadevice_and_isolates_bad_state_entries() {
        let raw = json!({
            "id": "lamp-1",
            "deviceId": "phys-1",
            "typeId": "metadevice.device",
            "friendlyName": "Kitchen lamp",
            "description": {
                "device": { "deviceClass": "light", "model": "A19" },
                "functions": [
                    { "functionClass": "power", "type": "category",
                      "values": [{ "name": "on" }, { "name": "off" }] }
                ]
            },
            "state": { "values": [
                { "functionClass": "power", "value": "on", "lastUpdateTime": 1 },
                { "value": "missing class" }
            ]}
        });

        let device: MetaDevice = serde_json::from_value(raw).unwrap();
        assert_eq!(device.id, "lamp-1");
        assert_eq!(device.description.device.device_class.as_deref(), Some("light"));

        let functions: Vec<_> = device.functions().collect();
        assert_eq!(functions.len(), 1);
        assert!(functions[0].is_ok());

        let states: Vec<_> = device.state_values().collect();
        assert!(states[0].is_ok());
        assert!(states[1].is_err());
    }

    #[test]
    fn state_update_serializes_camel_case() {
        let update = StateUpdate {
            metadevice_id: "lamp-1".into(),
            values: vec![StateValue {
                function_class: "power".into(),
                function_instance: None,
                value: json!("on"),
                last_update_time: None,
            }],
        };
        let v = serde_json::to_value(&update).unwrap();
        assert_eq!(v["metadeviceId"], "lamp-1");
        assert_eq!(v["values"][0]["functionClass"], "power");
        assert!(v["values"][0].get("lastUpdateTime").is_none());
    }
}
