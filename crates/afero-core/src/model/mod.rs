// ── Domain model ──
//
// Canonical types produced by the reconciler and consumed by the CLI and
// integrations. No wire-format concerns leak past `convert.rs`.

pub mod device;
pub mod domain;
pub mod event;
pub mod value;

pub use device::{Device, DeviceInfo, Function, Resource};
pub use domain::{DomainError, FunctionDomain, Normalized};
pub use event::{BridgeEvent, BridgeStatus, ChangeEvent, ChangeSource, FunctionKey};
pub use value::Value;
