// ── Bridge-owned shared state ──
//
// One context per bridge, handed to the poller, dispatcher and reconciler
// at construction. Nothing here is global.

use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::command::PendingTable;
use crate::config::BridgeConfig;
use crate::error::{AuthError, CoreError, TransportError};
use crate::model::{BridgeEvent, BridgeStatus};
use crate::ports::{CredentialProvider, Transport};
use crate::store::DeviceRegistry;

pub(crate) struct BridgeContext<T, C> {
    pub transport: T,
    pub credentials: C,
    pub config: BridgeConfig,
    pub registry: Arc<DeviceRegistry>,
    pub bus: EventBus,
    pub pending: PendingTable,
    pub status: watch::Sender<BridgeStatus>,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
}

impl<T: Transport, C: CredentialProvider> BridgeContext<T, C> {
    pub fn new(transport: T, credentials: C, config: BridgeConfig) -> Self {
        let bus = EventBus::new(config.subscriber_capacity);
        let registry = Arc::new(DeviceRegistry::from_config(&config, bus.clone()));
        let (status, _) = watch::channel(BridgeStatus::Idle);
        Self {
            transport,
            credentials,
            config,
            registry,
            bus,
            pending: PendingTable::default(),
            status,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run `op` with a bearer token. If the token is rejected, refresh it
    /// once and retry; a second rejection is an auth failure.
    pub async fn authorized<F, Fut, R>(&self, op: F) -> Result<R, CoreError>
    where
        F: Fn(SecretString) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let token = self.credentials.token().await?;
        match op(token).await {
            Err(e) if e.is_unauthorized() => {
                debug!("access token rejected; refreshing");
                let token = self.credentials.refresh().await?;
                op(token).await.map_err(|e| {
                    if e.is_unauthorized() {
                        CoreError::Auth(AuthError::Rejected(e.to_string()))
                    } else {
                        CoreError::Transport(e)
                    }
                })
            }
            other => other.map_err(CoreError::Transport),
        }
    }

    /// Update the status and announce it on the bus if it changed.
    /// `Stopped` is final.
    pub fn set_status(&self, status: BridgeStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status || *current == BridgeStatus::Stopped {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            info!(%status, "bridge status changed");
            self.bus.publish_one(BridgeEvent::Status(status));
        }
    }
}
