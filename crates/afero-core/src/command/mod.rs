// ── Command dispatch ──
//
// Validate, apply optimistically, send, then confirm or revert. Each
// command runs on the bridge's task tracker so it reaches a terminal state
// even if the caller stops waiting, and so `stop()` can drain it.

mod pending;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use pending::{PendingCommand, PendingState};
pub(crate) use pending::PendingTable;

use crate::backoff;
use crate::context::BridgeContext;
use crate::convert;
use crate::error::CoreError;
use crate::model::{ChangeSource, FunctionDomain, FunctionKey, Normalized, Value};
use crate::ports::{CommandRequest, CredentialProvider, Transport};
use crate::store::Delta;

/// Result of a confirmed command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub key: FunctionKey,
    /// Value held after confirmation: the server's echo if it sent one,
    /// otherwise the requested value.
    pub value: Value,
    /// `true` if the server echoed a value for the target.
    pub acknowledged: bool,
    pub attempts: u32,
    /// Revision of the last change this command produced, if any.
    pub revision: Option<u64>,
}

enum Attempt {
    Ack(serde_json::Value),
    Failed(CoreError),
    Cancelled,
    DeadlineExceeded,
}

pub(crate) struct Dispatcher<T, C> {
    ctx: Arc<BridgeContext<T, C>>,
}

impl<T: Transport, C: CredentialProvider> Dispatcher<T, C> {
    pub fn new(ctx: Arc<BridgeContext<T, C>>) -> Self {
        Self { ctx }
    }

    /// Send `value` to `key`.
    ///
    /// Unknown targets and out-of-domain values fail here, before any
    /// mutation or network call.
    pub async fn send(&self, key: FunctionKey, value: Value) -> Result<CommandOutcome, CoreError> {
        if self.ctx.cancel.is_cancelled() {
            return Err(CoreError::BridgeStopped);
        }
        let (domain, previous) = self.resolve(&key, &value)?;

        let ctx = Arc::clone(&self.ctx);
        let task = self
            .ctx
            .tracker
            .spawn(async move { execute(ctx, key, value, domain, previous).await });
        task.await
            .map_err(|e| CoreError::Internal(format!("command task failed: {e}")))?
    }

    pub fn pending(&self) -> Vec<PendingCommand> {
        self.ctx.pending.snapshot()
    }

    fn resolve(
        &self,
        key: &FunctionKey,
        value: &Value,
    ) -> Result<(FunctionDomain, Option<Value>), CoreError> {
        let device =
            self.ctx
                .registry
                .get(&key.device_id)
                .ok_or_else(|| CoreError::DeviceNotFound {
                    device_id: key.device_id.clone(),
                })?;
        let resource = device
            .resource(&key.resource_id)
            .ok_or_else(|| CoreError::ResourceNotFound {
                device_id: key.device_id.clone(),
                resource_id: key.resource_id.clone(),
            })?;
        let function =
            resource
                .function(&key.function_id)
                .ok_or_else(|| CoreError::FunctionNotFound {
                    target: key.to_string(),
                })?;
        function
            .domain
            .validate(value)
            .map_err(|reason| CoreError::DomainViolation {
                target: key.to_string(),
                reason,
            })?;
        Ok((function.domain.clone(), function.value.clone()))
    }
}

async fn execute<T: Transport, C: CredentialProvider>(
    ctx: Arc<BridgeContext<T, C>>,
    key: FunctionKey,
    value: Value,
    domain: FunctionDomain,
    previous: Option<Value>,
) -> Result<CommandOutcome, CoreError> {
    let deadline = Instant::now() + ctx.config.command_timeout;
    let mut command = PendingCommand::new(key, value, previous, deadline);
    let generation = ctx.pending.register(&command);

    let result = drive(&ctx, &mut command, generation, &domain).await;

    ctx.pending.finish(&command.key, generation);
    result
}

async fn drive<T: Transport, C: CredentialProvider>(
    ctx: &BridgeContext<T, C>,
    command: &mut PendingCommand,
    generation: u64,
    domain: &FunctionDomain,
) -> Result<CommandOutcome, CoreError> {
    let key = command.key.clone();
    let optimistic = Delta::new(key.clone(), command.desired.clone(), ChangeSource::Optimistic);
    match ctx.registry.apply_delta(optimistic) {
        Ok(event) => command.optimistic_revision = event.map(|e| e.revision),
        Err(e) => {
            command.advance(PendingState::Reverted);
            return Err(e);
        }
    }
    command.advance(PendingState::OptimisticApplied);

    let request = CommandRequest::new(&key, command.desired.clone());
    loop {
        command.advance(PendingState::InFlight);
        ctx.pending.update(generation, command);
        debug!(function = %key, attempt = command.attempts(), "sending command");

        let request = &request;
        let attempt = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Attempt::Cancelled,
            result = tokio::time::timeout_at(
                command.deadline,
                ctx.authorized(|token| async move {
                    ctx.transport.send_command(&token, request).await
                }),
            ) => match result {
                Ok(Ok(ack)) => Attempt::Ack(ack),
                Ok(Err(e)) => Attempt::Failed(e),
                Err(_) => Attempt::DeadlineExceeded,
            },
        };

        match attempt {
            Attempt::Ack(ack) => {
                command.advance(PendingState::Confirmed);
                return Ok(confirm(ctx, command, domain, &ack));
            }
            Attempt::Failed(err)
                if err.is_transient() && command.retries < ctx.config.command_retries =>
            {
                command.retries += 1;
                command.advance(PendingState::Retrying);
                ctx.pending.update(generation, command);

                let delay = backoff::linear(ctx.config.command_retry_delay, command.retries);
                warn!(
                    function = %key,
                    attempt = command.retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "command failed; retrying"
                );
                let wake = (Instant::now() + delay).min(command.deadline);
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => {
                        revert(ctx, command);
                        return Err(CoreError::Cancelled { target: key.to_string() });
                    }
                    () = tokio::time::sleep_until(wake) => {}
                }
            }
            Attempt::Failed(err) => {
                revert(ctx, command);
                return Err(CoreError::CommandFailed {
                    target: key.to_string(),
                    attempts: command.attempts(),
                    reason: err.to_string(),
                });
            }
            Attempt::DeadlineExceeded => {
                revert(ctx, command);
                return Err(CoreError::CommandFailed {
                    target: key.to_string(),
                    attempts: command.attempts(),
                    reason: format!(
                        "no confirmation within {}s",
                        ctx.config.command_timeout.as_secs_f64()
                    ),
                });
            }
            Attempt::Cancelled => {
                revert(ctx, command);
                return Err(CoreError::Cancelled {
                    target: key.to_string(),
                });
            }
        }
    }
}

/// Reconcile the server's answer with the optimistic value.
fn confirm<T, C>(
    ctx: &BridgeContext<T, C>,
    command: &PendingCommand,
    domain: &FunctionDomain,
    ack: &serde_json::Value,
) -> CommandOutcome {
    let epsilon = ctx.config.float_epsilon;
    let echoed = convert::echoed_value(ack, &command.key).and_then(|v| {
        domain
            .normalize(v)
            .map(Normalized::into_value)
            .inspect_err(|e| warn!(function = %command.key, error = %e, "ignoring echoed value"))
            .ok()
    });
    let acknowledged = echoed.is_some();

    let mut revision = command.optimistic_revision;
    let value = match echoed {
        Some(echo) if !domain.values_equal(&echo, &command.desired, epsilon) => {
            let delta = Delta::new(command.key.clone(), echo.clone(), ChangeSource::CommandAck);
            match ctx.registry.apply_delta(delta) {
                Ok(Some(event)) => revision = Some(event.revision),
                Ok(None) => {}
                Err(e) => warn!(function = %command.key, error = %e, "echoed value not applied"),
            }
            echo
        }
        _ => command.desired.clone(),
    };

    info!(function = %command.key, value = %value, attempts = command.attempts(), "command confirmed");
    CommandOutcome {
        key: command.key.clone(),
        value,
        acknowledged,
        attempts: command.attempts(),
        revision,
    }
}

/// Restore the pre-command value, unless something else changed it since.
/// A function that had no value goes back to unset.
fn revert<T, C>(ctx: &BridgeContext<T, C>, command: &mut PendingCommand) {
    command.advance(PendingState::Reverted);
    if command.optimistic_revision.is_none() {
        return;
    }

    let key = command.key.clone();
    let delta = match command.previous.clone() {
        Some(previous) => Delta::new(key, previous, ChangeSource::Revert),
        None => Delta::unset(key, ChangeSource::Revert),
    }
    .only_if(command.desired.clone());
    match ctx.registry.apply_delta(delta) {
        Ok(Some(event)) => {
            warn!(function = %command.key, revision = event.revision, "command failed; optimistic value reverted");
        }
        Ok(None) => debug!(function = %command.key, "value moved on; nothing to revert"),
        Err(e) => warn!(function = %command.key, error = %e, "revert not applied"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::bus::{EventFilter, Subscription};
    use crate::config::BridgeConfig;
    use crate::error::TransportError;
    use crate::model::ChangeEvent;
    use crate::reconcile::Reconciler;
    use crate::testing::{FakeCredentials, FakeTransport, lamp_json, lamp_payload};

    type Ctx = BridgeContext<Arc<FakeTransport>, Arc<FakeCredentials>>;

    struct Harness {
        ctx: Arc<Ctx>,
        dispatcher: Dispatcher<Arc<FakeTransport>, Arc<FakeCredentials>>,
        transport: Arc<FakeTransport>,
        events: Subscription,
    }

    /// lamp-1 with power "off" and brightness 40, already reconciled.
    fn harness() -> Harness {
        let transport = FakeTransport::with_listing(Vec::new());
        let ctx = Arc::new(BridgeContext::new(
            Arc::clone(&transport),
            Arc::new(FakeCredentials::default()),
            BridgeConfig::default(),
        ));
        Reconciler::with_pending(Arc::clone(&ctx.registry), ctx.pending.clone())
            .reconcile(&lamp_payload(&[("lamp-1", "off", 40)]));
        let events = ctx.bus.subscribe(EventFilter::ChangesOnly);
        Harness {
            dispatcher: Dispatcher::new(Arc::clone(&ctx)),
            ctx,
            transport,
            events,
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| sub.try_recv())
            .filter_map(|e| e.as_change().cloned())
            .collect()
    }

    fn power() -> FunctionKey {
        FunctionKey::new("lamp-1", "main", "power")
    }

    #[tokio::test]
    async fn matching_echo_confirms_without_extra_event() {
        let mut h = harness();

        let outcome = h.dispatcher.send(power(), "on".into()).await.unwrap();
        assert_eq!(outcome.value, Value::from("on"));
        assert!(outcome.acknowledged);
        assert_eq!(outcome.attempts, 1);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, ChangeSource::Optimistic);
        assert_eq!(events[0].old, Some(Value::from("off")));
        assert_eq!(events[0].new, Some(Value::from("on")));
        assert!(h.dispatcher.pending().is_empty());
    }

    #[tokio::test]
    async fn differing_echo_emits_command_ack() {
        let mut h = harness();
        h.transport.script_command(Ok(json!({
            "values": [{ "functionClass": "brightness", "value": 50 }]
        })));

        let key = FunctionKey::new("lamp-1", "main", "brightness");
        let outcome = h.dispatcher.send(key, Value::Number(55.0)).await.unwrap();
        assert_eq!(outcome.value, Value::Number(50.0));

        let sources: Vec<(ChangeSource, Option<Value>)> = drain(&mut h.events)
            .into_iter()
            .map(|e| (e.source, e.new))
            .collect();
        assert_eq!(
            sources,
            vec![
                (ChangeSource::Optimistic, Some(Value::Number(55.0))),
                (ChangeSource::CommandAck, Some(Value::Number(50.0))),
            ]
        );
        assert_eq!(outcome.revision, Some(h.ctx.registry.revision()));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_revert_and_fail() {
        let mut h = harness();
        for _ in 0..4 {
            h.transport.script_command(Err(TransportError::Timeout));
        }

        let err = h.dispatcher.send(power(), "on".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { attempts: 4, .. }), "got {err:?}");
        assert_eq!(h.transport.commands.lock().len(), 4);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].source, ChangeSource::Revert);
        assert_eq!(events[1].old, Some(Value::from("on")));
        assert_eq!(events[1].new, Some(Value::from("off")));

        let lamp = h.ctx.registry.get("lamp-1").unwrap();
        assert_eq!(lamp.function("main", "power").unwrap().value, Some(Value::from("off")));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_on_unset_function_clears_it() {
        let mut h = harness();
        let mut fresh = lamp_json("lamp-2", "off", 10);
        fresh["state"]["values"] = json!([{ "functionClass": "brightness", "value": 10 }]);
        Reconciler::with_pending(Arc::clone(&h.ctx.registry), h.ctx.pending.clone())
            .reconcile(&[lamp_json("lamp-1", "off", 40), fresh]);
        drain(&mut h.events);
        for _ in 0..4 {
            h.transport.script_command(Err(TransportError::Timeout));
        }

        let key = FunctionKey::new("lamp-2", "main", "power");
        let err = h.dispatcher.send(key, "on".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { attempts: 4, .. }), "got {err:?}");

        let events: Vec<(ChangeSource, Option<Value>, Option<Value>)> = drain(&mut h.events)
            .into_iter()
            .map(|e| (e.source, e.old, e.new))
            .collect();
        assert_eq!(
            events,
            vec![
                (ChangeSource::Optimistic, None, Some(Value::from("on"))),
                (ChangeSource::Revert, Some(Value::from("on")), None),
            ]
        );
        let lamp = h.ctx.registry.get("lamp-2").unwrap();
        assert_eq!(lamp.function("main", "power").unwrap().value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let mut h = harness();
        h.transport.script_command(Err(TransportError::Unavailable { status: 503 }));

        let outcome = h.dispatcher.send(power(), "on".into()).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(drain(&mut h.events).len(), 1);
    }

    #[tokio::test]
    async fn rejected_command_is_not_retried() {
        let mut h = harness();
        h.transport.script_command(Err(TransportError::Rejected {
            status: 400,
            message: "bad value".into(),
        }));

        let err = h.dispatcher.send(power(), "on".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { attempts: 1, .. }));
        assert_eq!(h.transport.commands.lock().len(), 1);
        assert_eq!(drain(&mut h.events).last().unwrap().source, ChangeSource::Revert);
    }

    #[tokio::test]
    async fn invalid_targets_fail_fast() {
        let mut h = harness();

        let err = h.dispatcher.send(power(), "dim".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::DomainViolation { .. }));

        let err = h
            .dispatcher
            .send(FunctionKey::new("lamp-9", "main", "power"), "on".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound { .. }));

        let err = h
            .dispatcher
            .send(FunctionKey::new("lamp-1", "outlet-2", "power"), "on".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ResourceNotFound { .. }));

        assert!(h.transport.commands.lock().is_empty());
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn cancellation_reverts() {
        let mut h = harness();
        h.transport.script_command(Err(TransportError::Timeout));

        let mut optimistic = h.ctx.bus.subscribe(EventFilter::Source(ChangeSource::Optimistic));
        let dispatcher = Dispatcher::new(Arc::clone(&h.ctx));
        let task = tokio::spawn(async move { dispatcher.send(power(), "on".into()).await });

        optimistic.recv().await.unwrap();
        h.ctx.cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Cancelled { .. }));
        assert_eq!(drain(&mut h.events).last().unwrap().source, ChangeSource::Revert);
    }

    #[tokio::test]
    async fn rejected_token_refreshes_before_sending_again() {
        let h = harness();
        h.transport.script_command(Err(TransportError::Unauthorized("HTTP 401".into())));

        let outcome = h.dispatcher.send(power(), "on".into()).await.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(h.ctx.credentials.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(h.transport.commands.lock().len(), 2);
    }

    #[tokio::test]
    async fn stopped_bridge_refuses_commands() {
        let h = harness();
        h.ctx.cancel.cancel();
        let err = h.dispatcher.send(power(), "on".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::BridgeStopped));
        assert!(h.transport.commands.lock().is_empty());
    }
}
