// ── Pending command state ──

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::model::{FunctionKey, Value};

/// Lifecycle of an outbound command.
///
/// `Created → OptimisticApplied → InFlight → {Confirmed | Retrying → InFlight | Reverted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum PendingState {
    Created,
    OptimisticApplied,
    InFlight,
    Retrying,
    Confirmed,
    Reverted,
}

impl PendingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Reverted)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use PendingState::{Confirmed, Created, InFlight, OptimisticApplied, Retrying, Reverted};
        matches!(
            (self, next),
            (Created, OptimisticApplied | Reverted)
                | (OptimisticApplied, InFlight | Reverted)
                | (InFlight, Confirmed | Retrying | Reverted)
                | (Retrying, InFlight | Reverted)
        )
    }
}

/// An in-flight write to one function.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub key: FunctionKey,
    pub desired: Value,
    /// Value before the optimistic update, restored on failure.
    pub previous: Option<Value>,
    /// Revision of the optimistic change, if one was applied.
    pub optimistic_revision: Option<u64>,
    pub retries: u32,
    pub deadline: Instant,
    state: PendingState,
}

impl PendingCommand {
    pub(crate) fn new(
        key: FunctionKey,
        desired: Value,
        previous: Option<Value>,
        deadline: Instant,
    ) -> Self {
        Self {
            key,
            desired,
            previous,
            optimistic_revision: None,
            retries: 0,
            deadline,
            state: PendingState::Created,
        }
    }

    pub fn state(&self) -> PendingState {
        self.state
    }

    /// Attempts made so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    pub(crate) fn advance(&mut self, next: PendingState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid command transition {} -> {next}",
            self.state
        );
        trace!(function = %self.key, from = %self.state, to = %next, "command state");
        self.state = next;
    }
}

/// Commands in flight, keyed by target. The newest command on a key wins;
/// older ones only clear their own entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingTable {
    entries: Arc<DashMap<FunctionKey, (u64, PendingCommand)>>,
    generation: Arc<AtomicU64>,
}

impl PendingTable {
    pub fn register(&self, command: &PendingCommand) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries
            .insert(command.key.clone(), (generation, command.clone()));
        generation
    }

    pub fn update(&self, generation: u64, command: &PendingCommand) {
        if let Some(mut entry) = self.entries.get_mut(&command.key) {
            if entry.0 == generation {
                entry.1 = command.clone();
            }
        }
    }

    pub fn finish(&self, key: &FunctionKey, generation: u64) {
        self.entries.remove_if(key, |_, (g, _)| *g == generation);
    }

    pub fn contains(&self, key: &FunctionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn snapshot(&self) -> Vec<PendingCommand> {
        self.entries.iter().map(|e| e.value().1.clone()).collect()
    }
}
