// ── Reconciliation ──
//
// Turns a raw device listing into registry mutations: one atomic batch per
// poll, so readers never observe half a poll. Ordering is deterministic:
// known devices in discovery order, then new devices in payload order;
// resources and functions in declared order; evictions last.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::PendingTable;
use crate::convert;
use crate::model::{BridgeEvent, ChangeSource};
use crate::store::{Delta, DeviceRegistry, Mutation};

/// Diffs polled state against the registry and applies it.
pub struct Reconciler {
    registry: Arc<DeviceRegistry>,
    pending: PendingTable,
}

impl Reconciler {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self::with_pending(registry, PendingTable::default())
    }

    /// Functions with a command in flight are left alone until it settles.
    pub(crate) fn with_pending(registry: Arc<DeviceRegistry>, pending: PendingTable) -> Self {
        Self { registry, pending }
    }

    /// Apply one full device listing and return the events it produced.
    ///
    /// A device that fails to decode is skipped but still counts as seen,
    /// so a transient decoding problem never evicts it.
    pub fn reconcile(&self, payload: &[serde_json::Value]) -> Vec<BridgeEvent> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(payload.len());

        for raw in payload {
            match convert::parse_device(raw) {
                Ok(candidate) => {
                    if seen.insert(candidate.device.id.clone()) {
                        candidates.push(candidate);
                    } else {
                        warn!(device_id = %candidate.device.id, "duplicate device in listing; keeping first");
                    }
                }
                Err(e) => {
                    if let Some(id) = convert::raw_device_id(raw) {
                        seen.insert(id);
                    }
                    warn!(error = %e, "skipping malformed device");
                }
            }
        }

        let snapshot = self.registry.snapshot();
        candidates.sort_by_key(|c| snapshot.position(&c.device.id).unwrap_or(usize::MAX));

        let mut batch = Vec::new();
        for candidate in candidates {
            batch.push(Mutation::Upsert(candidate.device));
            batch.extend(
                candidate
                    .values
                    .into_iter()
                    .map(|(key, value)| Mutation::Set(Delta::new(key, value, ChangeSource::Poll))),
            );
        }
        batch.push(Mutation::Sweep(seen));

        let pending = &self.pending;
        let events = self.registry.commit(batch, &|key| {
            let busy = pending.contains(key);
            if busy {
                debug!(function = %key, "command in flight; poll value deferred");
            }
            busy
        });
        debug!(events = events.len(), revision = self.registry.revision(), "reconciled poll");
        events
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::model::{ChangeEvent, FunctionKey, Value};
    use crate::testing::{lamp_json, lamp_payload};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reconciler(miss_threshold: u32) -> Reconciler {
        Reconciler::new(Arc::new(DeviceRegistry::new(
            EventBus::new(64),
            miss_threshold,
            1e-6,
        )))
    }

    fn changes(events: &[BridgeEvent]) -> Vec<(String, Option<Value>, Value)> {
        events
            .iter()
            .filter_map(BridgeEvent::as_change)
            .map(|c| (c.key().to_string(), c.old.clone(), c.new.clone().unwrap()))
            .collect()
    }

    #[test]
    fn first_poll_discovers_devices_in_order() {
        let r = reconciler(1);
        let events = r.reconcile(&lamp_payload(&[("lamp-1", "off", 40), ("lamp-2", "on", 100)]));

        assert_eq!(
            events[0],
            BridgeEvent::DeviceAdded {
                device_id: "lamp-1".into(),
                revision: 1
            }
        );
        assert_eq!(
            changes(&events),
            vec![
                ("lamp-1/main/power".into(), None, Value::from("off")),
                ("lamp-1/main/brightness".into(), None, Value::Number(40.0)),
                ("lamp-2/main/power".into(), None, Value::from("on")),
                ("lamp-2/main/brightness".into(), None, Value::Number(100.0)),
            ]
        );
    }

    #[test]
    fn same_payload_twice_is_silent() {
        let r = reconciler(1);
        let payload = lamp_payload(&[("lamp-1", "off", 40)]);
        assert!(!r.reconcile(&payload).is_empty());

        let rev = r.registry.revision();
        assert!(r.reconcile(&payload).is_empty());
        assert_eq!(r.registry.revision(), rev);
    }

    #[test]
    fn revisions_strictly_increase() {
        let r = reconciler(1);
        let mut last = 0;
        for (power, level) in [("off", 10), ("on", 10), ("on", 55), ("off", 0), ("off", 0)] {
            for event in r.reconcile(&lamp_payload(&[("lamp-1", power, level)])) {
                let rev = event.revision().unwrap();
                assert!(rev > last, "revision {rev} after {last}");
                last = rev;
            }
        }
        assert_eq!(r.registry.revision(), last);
    }

    #[test]
    fn out_of_range_value_is_clamped_without_touching_siblings() {
        let r = reconciler(1);
        r.reconcile(&lamp_payload(&[("lamp-1", "off", 40)]));

        let events = r.reconcile(&lamp_payload(&[("lamp-1", "off", 250)]));
        assert_eq!(
            changes(&events),
            vec![(
                "lamp-1/main/brightness".into(),
                Some(Value::Number(40.0)),
                Value::Number(100.0)
            )]
        );
        let device = r.registry.get("lamp-1").unwrap();
        assert_eq!(device.function("main", "power").unwrap().value, Some(Value::from("off")));
    }

    fn with_ssid(ssid: &str) -> serde_json::Value {
        let mut lamp = lamp_json("lamp-1", "on", 40);
        lamp["state"]["values"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "functionClass": "wifi-ssid", "value": ssid }));
        lamp
    }

    #[test]
    fn undeclared_text_value_change_reports_previous_value() {
        let r = reconciler(1);
        r.reconcile(&[with_ssid("home")]);
        let rev = r.registry.revision();

        let events = r.reconcile(&[with_ssid("work")]);
        assert_eq!(
            events,
            vec![BridgeEvent::Change(ChangeEvent {
                device_id: "lamp-1".into(),
                resource_id: "main".into(),
                function_id: "wifi-ssid".into(),
                old: Some(Value::from("home")),
                new: Some(Value::from("work")),
                revision: rev + 1,
                source: ChangeSource::Poll,
            })]
        );

        let events = r.reconcile(&[with_ssid("home")]);
        assert_eq!(
            changes(&events),
            vec![(
                "lamp-1/main/wifi-ssid".into(),
                Some(Value::from("work")),
                Value::from("home")
            )]
        );
        assert_eq!(r.registry.revision(), rev + 2);

        let device = r.registry.get("lamp-1").unwrap();
        assert_eq!(
            device.function("main", "wifi-ssid").unwrap().domain,
            crate::model::FunctionDomain::enumerated(["home", "work"])
        );
    }

    #[test]
    fn narrowed_domains_never_drop_the_stored_value() {
        let r = reconciler(1);
        r.reconcile(&lamp_payload(&[("lamp-1", "off", 80)]));

        let mut narrowed = lamp_json("lamp-1", "standby", 80);
        narrowed["description"]["functions"][0]["values"] =
            json!([{ "name": "on" }, { "name": "standby" }]);
        narrowed["description"]["functions"][1]["values"][0]["range"]["max"] = json!(50);
        let events = r.reconcile(&[narrowed]);

        // The stored brightness is clamped into the new range; the stored
        // power is no longer a valid name but still shows up as `old`.
        assert_eq!(
            changes(&events),
            vec![
                (
                    "lamp-1/main/brightness".into(),
                    Some(Value::Number(80.0)),
                    Value::Number(50.0)
                ),
                (
                    "lamp-1/main/power".into(),
                    Some(Value::from("off")),
                    Value::from("standby")
                ),
            ]
        );
        let revisions: Vec<u64> = events.iter().filter_map(BridgeEvent::revision).collect();
        assert_eq!(revisions, vec![5, 6]);
        assert!(events
            .iter()
            .filter_map(BridgeEvent::as_change)
            .all(|c| c.source == ChangeSource::Poll));

        let device = r.registry.get("lamp-1").unwrap();
        assert_eq!(device.revision, 6);
        assert_eq!(device.function("main", "brightness").unwrap().value, Some(Value::Number(50.0)));
    }

    #[test]
    fn missing_device_removed_exactly_once() {
        let r = reconciler(1);
        r.reconcile(&lamp_payload(&[("lamp-1", "off", 40), ("lamp-2", "on", 100)]));

        let events = r.reconcile(&lamp_payload(&[("lamp-1", "off", 40)]));
        assert_eq!(
            events,
            vec![BridgeEvent::DeviceRemoved {
                device_id: "lamp-2".into(),
                revision: 7
            }]
        );
        assert!(r.reconcile(&lamp_payload(&[("lamp-1", "off", 40)])).is_empty());
    }

    #[test]
    fn malformed_device_is_isolated_and_kept() {
        let r = reconciler(1);
        r.reconcile(&lamp_payload(&[("lamp-1", "off", 40), ("lamp-2", "on", 100)]));

        let payload = vec![
            lamp_json("lamp-1", "on", 40),
            json!({ "id": "lamp-2", "state": "garbled" }),
        ];
        let events = r.reconcile(&payload);

        assert_eq!(
            changes(&events),
            vec![("lamp-1/main/power".into(), Some(Value::from("off")), Value::from("on"))]
        );
        assert!(r.registry.get("lamp-2").is_some());
    }

    #[test]
    fn new_devices_follow_known_ones() {
        let r = reconciler(1);
        r.reconcile(&lamp_payload(&[("lamp-1", "off", 40)]));

        let events = r.reconcile(&lamp_payload(&[("lamp-0", "on", 1), ("lamp-1", "on", 40)]));
        let order: Vec<&str> = events.iter().filter_map(BridgeEvent::device_id).collect();
        assert_eq!(order, vec!["lamp-1", "lamp-0", "lamp-0", "lamp-0"]);
    }

    #[test]
    fn pending_functions_are_deferred() {
        let registry = Arc::new(DeviceRegistry::new(EventBus::new(64), 1, 1e-6));
        let pending = PendingTable::default();
        let r = Reconciler::with_pending(Arc::clone(&registry), pending.clone());
        r.reconcile(&lamp_payload(&[("lamp-1", "off", 40)]));

        let key = FunctionKey::new("lamp-1", "main", "power");
        let command = crate::command::PendingCommand::new(
            key.clone(),
            Value::from("on"),
            Some(Value::from("off")),
            tokio::time::Instant::now(),
        );
        let generation = pending.register(&command);

        let events = r.reconcile(&lamp_payload(&[("lamp-1", "on", 60)]));
        let touched: Vec<FunctionKey> = events
            .iter()
            .filter_map(BridgeEvent::as_change)
            .map(ChangeEvent::key)
            .collect();
        assert_eq!(touched, vec![FunctionKey::new("lamp-1", "main", "brightness")]);

        pending.finish(&key, generation);
        let events = r.reconcile(&lamp_payload(&[("lamp-1", "on", 60)]));
        assert_eq!(
            changes(&events),
            vec![("lamp-1/main/power".into(), Some(Value::from("off")), Value::from("on"))]
        );
    }
}
