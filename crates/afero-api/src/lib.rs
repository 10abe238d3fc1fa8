// afero-api: Async Rust client for the Afero IoT cloud API (Hubspace, Myko)

pub mod auth;
pub mod client;
pub mod error;
pub mod metadevices;
pub mod models;
pub mod transport;

pub use auth::{AferoAuth, TokenData};
pub use client::AferoClient;
pub use error::Error;
pub use models::{FunctionDescriptor, MetaDevice, StateUpdate, StateValue};
pub use transport::{Endpoints, TransportConfig, Vendor};
