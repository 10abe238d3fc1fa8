//! `watch`: poll in the background and print events until Ctrl-C.

use afero_core::{BridgeEvent, EventFilter};
use tracing::info;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;
use crate::session::AferoBridge;

use super::find_device;

pub async fn handle(
    bridge: &AferoBridge,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // Resolve a friendly name before the stream starts.
    let device_id = match args.device {
        Some(ref identifier) => {
            bridge.refresh_now().await?;
            Some(find_device(bridge, identifier)?.id.clone())
        }
        None => None,
    };

    let filter = match (device_id, args.changes_only) {
        (Some(id), false) => EventFilter::Device(id),
        (Some(id), true) => EventFilter::custom(move |event: &BridgeEvent| {
            event.as_change().is_some_and(|c| c.device_id == id)
        }),
        (None, true) => EventFilter::ChangesOnly,
        (None, false) => EventFilter::All,
    };
    let mut events = bridge.subscribe(filter);

    bridge.start()?;
    info!(interval_secs = bridge.config().poll_interval.as_secs(), "watching for changes");
    if !global.quiet {
        eprintln!("Watching devices, press Ctrl-C to stop");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => output::print_event(&event, global.output)?,
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    let dropped = events.dropped();
    if dropped > 0 {
        tracing::warn!(dropped, "events were dropped while output was blocked");
    }
    Ok(())
}
