// ── Device registry ──
//
// Authoritative in-memory state. Readers load immutable snapshots without
// locking; every mutation goes through a single serialized writer that
// bumps the revision and publishes the resulting events before releasing
// the write lock, so publish order always equals revision order.

mod registry;

pub use registry::{Delta, DeviceRegistry, RegistrySnapshot};
pub(crate) use registry::Mutation;
