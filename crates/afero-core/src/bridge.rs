// ── Bridge facade ──
//
// Composes the registry, event bus, poller and dispatcher around one
// shared context and owns their lifecycle. Cheaply cloneable; the last
// clone to drop cancels background work.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bus::{EventBus, EventFilter, Subscription};
use crate::command::{CommandOutcome, Dispatcher, PendingCommand};
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::CoreError;
use crate::model::{BridgeStatus, Device, FunctionKey, Value};
use crate::poller::{PollOutcome, Poller};
use crate::ports::{CredentialProvider, Transport};
use crate::store::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

struct BridgeInner<T, C> {
    ctx: Arc<BridgeContext<T, C>>,
    poller: Arc<Poller<T, C>>,
    dispatcher: Dispatcher<T, C>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T, C> Drop for BridgeInner<T, C> {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
    }
}

/// Client bridge to the Afero cloud.
///
/// ```ignore
/// let bridge = Bridge::new(client, auth, BridgeConfig::default())?;
/// let mut events = bridge.subscribe(EventFilter::ChangesOnly);
/// bridge.start()?;
/// bridge.send("lamp-1", "main", "power", "on").await?;
/// bridge.stop().await;
/// ```
pub struct Bridge<T, C> {
    inner: Arc<BridgeInner<T, C>>,
}

impl<T, C> Clone for Bridge<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, C: CredentialProvider> Bridge<T, C> {
    pub fn new(transport: T, credentials: C, config: BridgeConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let ctx = Arc::new(BridgeContext::new(transport, credentials, config));
        Ok(Self {
            inner: Arc::new(BridgeInner {
                poller: Arc::new(Poller::new(Arc::clone(&ctx))),
                dispatcher: Dispatcher::new(Arc::clone(&ctx)),
                ctx,
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Begin background polling. Must be called within a Tokio runtime.
    /// Calling it again while running is a no-op; a stopped bridge cannot
    /// be restarted.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Stopped => Err(CoreError::BridgeStopped),
            Lifecycle::Idle => {
                let ctx = &self.inner.ctx;
                info!(
                    interval_secs = ctx.config.poll_interval.as_secs_f64(),
                    "starting bridge"
                );
                ctx.tracker.spawn(Arc::clone(&self.inner.poller).run());
                *lifecycle = Lifecycle::Running;
                Ok(())
            }
        }
    }

    /// Stop polling, cancel in-flight commands (they revert), wait for them
    /// up to `shutdown_timeout`, then release every subscription.
    /// Idempotent.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        let ctx = &self.inner.ctx;
        info!("stopping bridge");
        ctx.cancel.cancel();
        ctx.tracker.close();
        if tokio::time::timeout(ctx.config.shutdown_timeout, ctx.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = ctx.tracker.len(),
                "shutdown deadline reached with tasks still running"
            );
        }

        ctx.set_status(BridgeStatus::Stopped);
        ctx.bus.close();
        info!("bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.inner.lifecycle.lock() == Lifecycle::Running
    }

    /// Run a poll cycle immediately. Returns `Skipped` if one is in flight.
    pub async fn refresh_now(&self) -> Result<PollOutcome, CoreError> {
        if self.inner.ctx.cancel.is_cancelled() {
            return Err(CoreError::BridgeStopped);
        }
        self.inner.poller.poll_once().await
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Write a function value. See [`CommandOutcome`] for the success case;
    /// failures are `DeviceNotFound`, `ResourceNotFound`,
    /// `FunctionNotFound`, `DomainViolation` (nothing sent), or
    /// `CommandFailed` / `Cancelled` (optimistic value reverted).
    pub async fn send(
        &self,
        device_id: &str,
        resource_id: &str,
        function_id: &str,
        value: impl Into<Value>,
    ) -> Result<CommandOutcome, CoreError> {
        let key = FunctionKey::new(device_id, resource_id, function_id);
        self.inner.dispatcher.send(key, value.into()).await
    }

    /// Commands currently in flight.
    pub fn pending_commands(&self) -> Vec<PendingCommand> {
        self.inner.dispatcher.pending()
    }

    // ── State access ─────────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.ctx.registry
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Device>> {
        self.inner.ctx.registry.get(device_id)
    }

    pub fn list_all(&self) -> Vec<Arc<Device>> {
        self.inner.ctx.registry.list_all()
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.inner.ctx.bus
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.ctx.bus.subscribe(filter)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner.ctx.bus.unsubscribe(subscription);
    }

    pub fn status(&self) -> BridgeStatus {
        *self.inner.ctx.status.borrow()
    }

    /// Watch status transitions.
    pub fn status_watch(&self) -> watch::Receiver<BridgeStatus> {
        self.inner.ctx.status.subscribe()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.ctx.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.ctx.transport
    }

    pub fn credentials(&self) -> &C {
        &self.inner.ctx.credentials
    }
}
