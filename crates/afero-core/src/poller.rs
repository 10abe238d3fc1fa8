// ── Background polling ──
//
// Periodic full-state refresh. A cycle fetches the device listing and
// hands it to the reconciler; failures back off exponentially and are
// reported through the bridge status. At most one cycle runs at a time:
// ticks and manual refreshes that arrive mid-cycle are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::context::BridgeContext;
use crate::error::CoreError;
use crate::model::BridgeStatus;
use crate::ports::{CredentialProvider, Transport};
use crate::reconcile::Reconciler;

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed { devices: usize, events: usize },
    /// Another cycle was already in flight.
    Skipped,
}

pub(crate) struct Poller<T, C> {
    ctx: Arc<BridgeContext<T, C>>,
    reconciler: Reconciler,
    in_flight: AtomicBool,
    failures: AtomicU32,
}

/// Clears the in-flight flag when a cycle ends, including by cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Transport, C: CredentialProvider> Poller<T, C> {
    pub fn new(ctx: Arc<BridgeContext<T, C>>) -> Self {
        let reconciler = Reconciler::with_pending(Arc::clone(&ctx.registry), ctx.pending.clone());
        Self {
            ctx,
            reconciler,
            in_flight: AtomicBool::new(false),
            failures: AtomicU32::new(0),
        }
    }

    /// Consecutive failed cycles.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Run one poll cycle now, unless one is already running.
    pub async fn poll_once(&self) -> Result<PollOutcome, CoreError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("poll already in flight; skipped");
            return Ok(PollOutcome::Skipped);
        }
        let _guard = InFlight(&self.in_flight);

        let ctx = &*self.ctx;
        let result = ctx
            .authorized(|token| async move { ctx.transport.fetch_devices(&token).await })
            .await
            .map(|payload| {
                let events = self.reconciler.reconcile(&payload);
                PollOutcome::Completed {
                    devices: payload.len(),
                    events: events.len(),
                }
            });
        self.record(&result);
        result
    }

    fn record(&self, result: &Result<PollOutcome, CoreError>) {
        match result {
            Ok(_) => {
                self.failures.store(0, Ordering::Release);
                self.ctx.set_status(BridgeStatus::Connected);
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if e.is_auth_failure() {
                    self.ctx.set_status(BridgeStatus::AuthFailed);
                } else {
                    self.ctx.set_status(BridgeStatus::Degraded {
                        consecutive_failures: failures,
                    });
                }
            }
        }
    }

    /// Poll every `poll_interval` until the bridge is cancelled.
    pub async fn run(self: Arc<Self>) {
        let config = &self.ctx.config;
        let cancel = self.ctx.cancel.clone();
        let backoff = Backoff::new(config.backoff_base, config.backoff_cap);

        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = config.poll_interval.as_secs_f64(),
            "poller started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };

            match result {
                Ok(PollOutcome::Completed { devices, events }) => {
                    debug!(devices, events, "poll cycle complete");
                }
                Ok(PollOutcome::Skipped) => {}
                Err(e) => {
                    let failures = self.failures();
                    let delay = backoff.delay(failures);
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "poll failed; backing off"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    ticker.reset_immediately();
                }
            }
        }
        info!("poller stopped");
    }
}
