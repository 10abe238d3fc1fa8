//! Command dispatch: CLI args -> bridge operations -> output.

pub mod devices;
pub mod set;
pub mod watch;

use std::sync::Arc;

use afero_core::Device;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::session::{AferoBridge, Session};

pub async fn dispatch(
    cmd: Command,
    session: &Session,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(&session.bridge, args, global).await,
        Command::Watch(args) => watch::handle(&session.bridge, args, global).await,
        Command::Set(args) => set::handle(&session.bridge, args, global).await,
    }
}

/// Look a device up by id, then by friendly name (case-insensitive).
pub(crate) fn find_device(
    bridge: &AferoBridge,
    identifier: &str,
) -> Result<Arc<Device>, CliError> {
    bridge
        .registry()
        .find(identifier)
        .ok_or_else(|| CliError::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
        })
}
