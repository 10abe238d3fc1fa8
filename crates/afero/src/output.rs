//! Plain-text and JSON rendering for devices and bridge events.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::Arc;

use afero_core::{BridgeEvent, Device, Value};

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn print_devices(devices: &[Arc<Device>], format: OutputFormat) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    match format {
        OutputFormat::Json => {
            let list: Vec<&Device> = devices.iter().map(AsRef::as_ref).collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&list)?)?;
        }
        OutputFormat::Plain => {
            for device in devices {
                writeln!(out, "{}", device_line(device))?;
            }
        }
    }
    Ok(())
}

pub fn print_device(device: &Device, format: OutputFormat) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(device)?)?,
        OutputFormat::Plain => {
            writeln!(out, "{}", device_line(device))?;
            let width = device
                .functions()
                .map(|(key, _)| key.resource_id.len() + key.function_id.len() + 1)
                .max()
                .unwrap_or(0);
            for (key, function) in device.functions() {
                let label = format!("{}/{}", key.resource_id, key.function_id);
                let value = function
                    .value
                    .as_ref()
                    .map_or_else(|| "-".to_owned(), ToString::to_string);
                writeln!(out, "  {label:<width$}  {value:<12} {}", function.domain)?;
            }
        }
    }
    Ok(())
}

pub fn print_event(event: &BridgeEvent, format: OutputFormat) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(event)?)?,
        OutputFormat::Plain => writeln!(out, "{}", event_line(event))?,
    }
    out.flush()?;
    Ok(())
}

fn device_line(device: &Device) -> String {
    let mut line = format!("{:<38} {}", device.id, device.name());
    let details: Vec<&str> = [&device.info.device_class, &device.info.model]
        .into_iter()
        .filter_map(Option::as_deref)
        .collect();
    if !details.is_empty() {
        let _ = write!(line, " ({})", details.join(", "));
    }
    line
}

fn event_line(event: &BridgeEvent) -> String {
    match event {
        BridgeEvent::Change(change) => {
            let show = |value: Option<&Value>| {
                value.map_or_else(|| "-".to_owned(), ToString::to_string)
            };
            format!(
                "#{:<6} {:<11} {}  {} -> {}",
                change.revision,
                change.source.to_string(),
                change.key(),
                show(change.old.as_ref()),
                show(change.new.as_ref())
            )
        }
        BridgeEvent::DeviceAdded { device_id, revision } => {
            format!("#{revision:<6} added       {device_id}")
        }
        BridgeEvent::DeviceRemoved { device_id, revision } => {
            format!("#{revision:<6} removed     {device_id}")
        }
        BridgeEvent::Status(status) => format!("status: {status}"),
    }
}
