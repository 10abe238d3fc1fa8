// ── Change events and bridge status ──

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// Address of a single function: (device, resource, function).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub device_id: String,
    pub resource_id: String,
    pub function_id: String,
}

impl FunctionKey {
    pub fn new(
        device_id: impl Into<String>,
        resource_id: impl Into<String>,
        function_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            resource_id: resource_id.into(),
            function_id: function_id.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device_id, self.resource_id, self.function_id)
    }
}

/// What produced a change.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChangeSource {
    /// Observed in a poll cycle.
    Poll,
    /// Echoed by the server in a command response.
    CommandAck,
    /// Applied locally before the command round-trip.
    Optimistic,
    /// Restores the pre-command value after a failed command.
    Revert,
}

/// A single function value transition. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub device_id: String,
    pub resource_id: String,
    pub function_id: String,
    /// Absent on first discovery.
    pub old: Option<Value>,
    /// Absent only when a revert returns the function to unset.
    pub new: Option<Value>,
    pub revision: u64,
    pub source: ChangeSource,
}

impl ChangeEvent {
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(&self.device_id, &self.resource_id, &self.function_id)
    }

    pub fn targets(&self, key: &FunctionKey) -> bool {
        self.device_id == key.device_id
            && self.resource_id == key.resource_id
            && self.function_id == key.function_id
    }
}

/// Connectivity as seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BridgeStatus {
    /// Not started yet.
    #[default]
    Idle,
    Connected,
    /// Poll cycles are failing; the poller is backing off.
    Degraded { consecutive_failures: u32 },
    /// Credentials were rejected even after a refresh. Polling continues.
    AuthFailed,
    Stopped,
}

impl BridgeStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connected => f.write_str("connected"),
            Self::Degraded {
                consecutive_failures,
            } => write!(f, "degraded ({consecutive_failures} failed polls)"),
            Self::AuthFailed => f.write_str("authentication failed"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Everything delivered through the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Change(ChangeEvent),
    DeviceAdded { device_id: String, revision: u64 },
    DeviceRemoved { device_id: String, revision: u64 },
    Status(BridgeStatus),
}

impl BridgeEvent {
    /// Device this event concerns, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Change(change) => Some(&change.device_id),
            Self::DeviceAdded { device_id, .. } | Self::DeviceRemoved { device_id, .. } => {
                Some(device_id)
            }
            Self::Status(_) => None,
        }
    }

    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            Self::Change(change) => Some(change),
            _ => None,
        }
    }

    pub fn revision(&self) -> Option<u64> {
        match self {
            Self::Change(change) => Some(change.revision),
            Self::DeviceAdded { revision, .. } | Self::DeviceRemoved { revision, .. } => {
                Some(*revision)
            }
            Self::Status(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn change_source_uses_kebab_case() {
        assert_eq!(ChangeSource::CommandAck.to_string(), "command-ack");
        assert_eq!("revert".parse::<ChangeSource>().unwrap(), ChangeSource::Revert);
        assert_eq!(
            serde_json::to_value(ChangeSource::Optimistic).unwrap(),
            serde_json::json!("optimistic")
        );
    }

    #[test]
    fn bridge_event_exposes_device_and_revision() {
        let removed = BridgeEvent::DeviceRemoved {
            device_id: "lamp-2".into(),
            revision: 9,
        };
        assert_eq!(removed.device_id(), Some("lamp-2"));
        assert_eq!(removed.revision(), Some(9));
        assert_eq!(BridgeEvent::Status(BridgeStatus::Connected).device_id(), None);
    }
}
