//! Device listing handlers.

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;
use crate::session::AferoBridge;

use super::find_device;

pub async fn handle(
    bridge: &AferoBridge,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    bridge.refresh_now().await?;

    match args.command.unwrap_or(DevicesCommand::List) {
        DevicesCommand::List => {
            let devices = bridge.list_all();
            if devices.is_empty() && !global.quiet {
                eprintln!("No devices on this account");
            }
            output::print_devices(&devices, global.output)
        }
        DevicesCommand::Get { device } => {
            let device = find_device(bridge, &device)?;
            output::print_device(&device, global.output)
        }
    }
}
