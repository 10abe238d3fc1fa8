//! `set`: parse a value against the function's domain and send it.

use afero_core::FunctionKey;

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::session::AferoBridge;

use super::find_device;

pub async fn handle(
    bridge: &AferoBridge,
    args: SetArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    bridge.refresh_now().await?;
    let device = find_device(bridge, &args.device)?;

    let key = FunctionKey::new(&device.id, &args.resource, &args.function);
    let function = device
        .function(&args.resource, &args.function)
        .ok_or_else(|| CliError::NotFound {
            resource_type: "function".into(),
            identifier: key.to_string(),
        })?;
    let value = function
        .domain
        .parse(&args.value)
        .map_err(|e| CliError::Validation {
            field: key.to_string(),
            reason: e.to_string(),
        })?;

    let outcome = bridge
        .send(&key.device_id, &key.resource_id, &key.function_id, value)
        .await?;

    if !global.quiet {
        let note = if outcome.acknowledged { "confirmed" } else { "sent" };
        eprintln!(
            "{} {}/{} = {} ({note}, {} attempt{})",
            device.name(),
            key.resource_id,
            key.function_id,
            outcome.value,
            outcome.attempts,
            if outcome.attempts == 1 { "" } else { "s" }
        );
    }
    Ok(())
}
