use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::{
    BridgeEvent, ChangeEvent, ChangeSource, Device, FunctionKey, Normalized, Value,
};

/// An immutable view of every known device at one revision.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    revision: u64,
    devices: IndexMap<String, Arc<Device>>,
}

impl RegistrySnapshot {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, device_id: &str) -> Option<&Arc<Device>> {
        self.devices.get(device_id)
    }

    /// Devices in discovery order.
    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Discovery index of a device.
    pub(crate) fn position(&self, device_id: &str) -> Option<usize> {
        self.devices.get_index_of(device_id)
    }

    /// Look a device up by id, falling back to a case-insensitive match on
    /// its friendly name.
    pub fn find(&self, id_or_name: &str) -> Option<&Arc<Device>> {
        self.devices.get(id_or_name).or_else(|| {
            self.devices.values().find(|d| {
                d.info
                    .name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(id_or_name))
            })
        })
    }
}

/// A requested function value transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub key: FunctionKey,
    /// `None` clears the function back to unset.
    pub value: Option<Value>,
    pub source: ChangeSource,
    /// Apply only if the current value still equals this one.
    pub expected: Option<Value>,
}

impl Delta {
    pub fn new(key: FunctionKey, value: Value, source: ChangeSource) -> Self {
        Self {
            key,
            value: Some(value),
            source,
            expected: None,
        }
    }

    /// Clear the function's value.
    pub fn unset(key: FunctionKey, source: ChangeSource) -> Self {
        Self {
            key,
            value: None,
            source,
            expected: None,
        }
    }

    /// Make the delta conditional on the current value.
    pub fn only_if(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }
}

/// One step of an atomic registry batch.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Upsert(Device),
    Set(Delta),
    Sweep(HashSet<String>),
}

/// The device registry. Cheap to share behind an `Arc`.
pub struct DeviceRegistry {
    current: ArcSwap<RegistrySnapshot>,
    writer: Mutex<HashMap<String, u32>>,
    bus: EventBus,
    miss_threshold: u32,
    epsilon: f64,
}

impl DeviceRegistry {
    pub fn new(bus: EventBus, miss_threshold: u32, epsilon: f64) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(HashMap::new()),
            bus,
            miss_threshold: miss_threshold.max(1),
            epsilon,
        }
    }

    pub fn from_config(config: &BridgeConfig, bus: EventBus) -> Self {
        Self::new(bus, config.miss_threshold, config.float_epsilon)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn revision(&self) -> u64 {
        self.current.load().revision
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Device>> {
        self.current.load().get(device_id).cloned()
    }

    /// Every device, in discovery order.
    pub fn list_all(&self) -> Vec<Arc<Device>> {
        self.current.load().devices().cloned().collect()
    }

    pub fn find(&self, id_or_name: &str) -> Option<Arc<Device>> {
        self.current.load().find(id_or_name).cloned()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Apply one function value change.
    ///
    /// Returns `Ok(None)` when nothing changed: the value already matches,
    /// or the delta's expectation no longer holds.
    pub fn apply_delta(&self, delta: Delta) -> Result<Option<ChangeEvent>, CoreError> {
        self.write(|txn| txn.set(delta, &|_| false))
    }

    /// Insert a device or update its metadata and function layout.
    ///
    /// Existing values are carried over. A value that a narrowed numeric
    /// range excludes is clamped and reported as a `Poll` change; any other
    /// misfit is kept until the next delta replaces it. Inferred enumerated
    /// domains only grow. Returns the registry revision after the call.
    pub fn upsert_device(&self, device: Device) -> u64 {
        self.write(|txn| {
            txn.upsert(device);
            txn.revision
        })
    }

    /// Count a miss for every device not in `seen` and evict those that
    /// reached the miss threshold. Returns the evicted ids.
    pub fn remove_stale(&self, seen: &HashSet<String>) -> Vec<String> {
        self.write(|txn| txn.sweep(seen))
    }

    /// Apply a batch atomically. Deltas whose key satisfies `skip` are
    /// ignored; invalid deltas are logged and ignored.
    pub(crate) fn commit(
        &self,
        batch: Vec<Mutation>,
        skip: &dyn Fn(&FunctionKey) -> bool,
    ) -> Vec<BridgeEvent> {
        self.write(|txn| {
            for mutation in batch {
                match mutation {
                    Mutation::Upsert(device) => txn.upsert(device),
                    Mutation::Set(delta) => {
                        let key = delta.key.clone();
                        if let Err(e) = txn.set(delta, skip) {
                            warn!(function = %key, error = %e, "delta not applied");
                        }
                    }
                    Mutation::Sweep(seen) => {
                        txn.sweep(&seen);
                    }
                }
            }
            txn.events.clone()
        })
    }

    /// Run `f` against a private copy of the current snapshot, then swap it
    /// in and publish the resulting events, all under the write lock.
    fn write<R>(&self, f: impl FnOnce(&mut Txn<'_>) -> R) -> R {
        let mut misses = self.writer.lock();
        let base = self.current.load_full();
        let mut txn = Txn {
            devices: base.devices.clone(),
            revision: base.revision,
            events: Vec::new(),
            touched: false,
            misses: &mut *misses,
            miss_threshold: self.miss_threshold,
            epsilon: self.epsilon,
        };

        let result = f(&mut txn);

        if txn.revision != base.revision || txn.touched {
            let Txn {
                devices,
                revision,
                events,
                ..
            } = txn;
            self.current
                .store(Arc::new(RegistrySnapshot { revision, devices }));
            self.bus.publish(&events);
        }
        result
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.current.load();
        f.debug_struct("DeviceRegistry")
            .field("revision", &snap.revision)
            .field("devices", &snap.devices.len())
            .finish_non_exhaustive()
    }
}

// ── Write transaction ────────────────────────────────────────────────

struct Txn<'a> {
    devices: IndexMap<String, Arc<Device>>,
    revision: u64,
    events: Vec<BridgeEvent>,
    /// Content changed without a revision bump.
    touched: bool,
    misses: &'a mut HashMap<String, u32>,
    miss_threshold: u32,
    epsilon: f64,
}

impl Txn<'_> {
    fn upsert(&mut self, mut incoming: Device) {
        self.misses.remove(&incoming.id);
        let now = Utc::now();

        let Some(existing) = self.devices.get_mut(&incoming.id) else {
            self.revision += 1;
            for resource in &mut incoming.resources {
                for function in &mut resource.functions {
                    if function
                        .value
                        .as_ref()
                        .is_some_and(|v| function.domain.validate(v).is_err())
                    {
                        function.value = None;
                    }
                }
            }
            incoming.revision = self.revision;
            incoming.discovered_at = now;
            incoming.updated_at = now;
            info!(device_id = %incoming.id, revision = self.revision, "device discovered");
            self.events.push(BridgeEvent::DeviceAdded {
                device_id: incoming.id.clone(),
                revision: self.revision,
            });
            self.devices.insert(incoming.id.clone(), Arc::new(incoming));
            return;
        };

        // Carry current values over into the incoming layout.
        let device_id = incoming.id.clone();
        let mut clamped = Vec::new();
        for resource in &mut incoming.resources {
            for function in &mut resource.functions {
                function.value = None;
                function.updated_at = None;
                let Some(prior) = existing.function(&resource.id, &function.id) else {
                    continue;
                };
                if function.inferred && prior.inferred {
                    function.domain = prior.domain.union(&function.domain);
                }
                let Some(value) = prior.value.clone() else {
                    continue;
                };
                function.updated_at = prior.updated_at;
                function.value = match function.domain.normalize(value.clone()) {
                    Ok(Normalized::Accepted(value)) => Some(value),
                    Ok(Normalized::Clamped { value: fitted, .. }) => {
                        let key = FunctionKey::new(&device_id, &resource.id, &function.id);
                        clamped.push((key, value, fitted.clone()));
                        function.updated_at = Some(now);
                        Some(fitted)
                    }
                    Err(e) => {
                        warn!(
                            device_id = %device_id,
                            function = %function.id,
                            error = %e,
                            "stored value no longer fits its domain; kept until replaced"
                        );
                        Some(value)
                    }
                };
            }
        }

        let same_values = existing.functions().count() == incoming.functions().count()
            && existing
                .functions()
                .zip(incoming.functions())
                .all(|((_, a), (_, b))| a.value == b.value);
        if same_values && existing.same_shape(&incoming) {
            return;
        }
        if same_values && existing.same_layout(&incoming) {
            // Only inferred domains grew: nothing a reader can observe changed.
            incoming.revision = existing.revision;
            incoming.discovered_at = existing.discovered_at;
            incoming.updated_at = existing.updated_at;
            *existing = Arc::new(incoming);
            self.touched = true;
            return;
        }

        self.revision += 1;
        debug!(device_id = %device_id, revision = self.revision, "device layout updated");
        for (key, old, new) in clamped {
            self.revision += 1;
            warn!(
                function = %key,
                old = %old,
                clamped = %new,
                "stored value outside new range, clamped"
            );
            self.events.push(BridgeEvent::Change(ChangeEvent {
                device_id: key.device_id,
                resource_id: key.resource_id,
                function_id: key.function_id,
                old: Some(old),
                new: Some(new),
                revision: self.revision,
                source: ChangeSource::Poll,
            }));
        }
        incoming.revision = self.revision;
        incoming.discovered_at = existing.discovered_at;
        incoming.updated_at = now;
        *existing = Arc::new(incoming);
    }

    fn set(
        &mut self,
        delta: Delta,
        skip: &dyn Fn(&FunctionKey) -> bool,
    ) -> Result<Option<ChangeEvent>, CoreError> {
        let Delta {
            key,
            value,
            source,
            expected,
        } = delta;
        if skip(&key) {
            return Ok(None);
        }

        let device = self
            .devices
            .get_mut(&key.device_id)
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

        // A revert restores what the registry held before; it is not re-validated.
        if let Some(value) = value.as_ref().filter(|_| source != ChangeSource::Revert) {
            function
                .domain
                .validate(value)
                .map_err(|reason| CoreError::DomainViolation {
                    target: key.to_string(),
                    reason,
                })?;
        }

        let current = function.value.as_ref();
        let equals = |other: Option<&Value>| match (current, other) {
            (Some(c), Some(o)) => function.domain.values_equal(c, o, self.epsilon),
            (None, None) => true,
            _ => false,
        };
        if expected.as_ref().is_some_and(|e| !equals(Some(e))) {
            debug!(function = %key, "conditional delta skipped; value moved on");
            return Ok(None);
        }
        if equals(value.as_ref()) {
            return Ok(None);
        }

        self.revision += 1;
        let revision = self.revision;
        let now = Utc::now();

        let device = Arc::make_mut(device);
        device.revision = revision;
        device.updated_at = now;
        let slot = device
            .resource_mut(&key.resource_id)
            .and_then(|r| r.function_mut(&key.function_id))
            .ok_or_else(|| CoreError::Internal(format!("{key} vanished during write")))?;
        let old = std::mem::replace(&mut slot.value, value.clone());
        slot.updated_at = value.as_ref().map(|_| now);

        let event = ChangeEvent {
            device_id: key.device_id,
            resource_id: key.resource_id,
            function_id: key.function_id,
            old,
            new: value,
            revision,
            source,
        };
        self.events.push(BridgeEvent::Change(event.clone()));
        Ok(Some(event))
    }

    fn sweep(&mut self, seen: &HashSet<String>) -> Vec<String> {
        let mut evicted = Vec::new();
        for id in self.devices.keys() {
            if seen.contains(id) {
                self.misses.remove(id);
                continue;
            }
            let count = self.misses.entry(id.clone()).or_insert(0);
            *count += 1;
            debug!(device_id = %id, misses = *count, "device missing from poll");
            if *count >= self.miss_threshold {
                evicted.push(id.clone());
            }
        }

        for id in &evicted {
            self.devices.shift_remove(id);
            self.misses.remove(id);
            self.revision += 1;
            info!(device_id = %id, revision = self.revision, "device removed");
            self.events.push(BridgeEvent::DeviceRemoved {
                device_id: id.clone(),
                revision: self.revision,
            });
        }

        let devices = &self.devices;
        self.misses.retain(|id, _| devices.contains_key(id));
        evicted
    }
}
