// afero-core: State synchronization engine between afero-api and consumers (CLI, integrations).

pub mod backoff;
pub mod bridge;
pub mod bus;
pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod poller;
pub mod ports;
pub mod reconcile;
pub mod store;

mod context;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::Bridge;
pub use bus::{EventBus, EventFilter, Subscription};
pub use command::{CommandOutcome, PendingCommand, PendingState};
pub use config::BridgeConfig;
pub use error::{AuthError, CoreError, TransportError};
pub use poller::PollOutcome;
pub use ports::{CommandRequest, CredentialProvider, Transport};
pub use reconcile::Reconciler;
pub use store::{Delta, DeviceRegistry, RegistrySnapshot};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BridgeEvent, BridgeStatus, ChangeEvent, ChangeSource, Device, DeviceInfo, DomainError,
    Function, FunctionDomain, FunctionKey, Normalized, Resource, Value,
};
