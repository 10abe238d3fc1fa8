// ── Subscription filters ──

use std::fmt;

use crate::model::{BridgeEvent, ChangeSource, FunctionKey};

/// Predicate selecting which events a subscription receives.
#[derive(Default)]
pub enum EventFilter {
    #[default]
    All,
    /// Changes and lifecycle events for one device.
    Device(String),
    /// Changes to a single function.
    Function(FunctionKey),
    /// Changes with a given source tag.
    Source(ChangeSource),
    /// Function value changes only (no lifecycle or status events).
    ChangesOnly,
    Custom(Box<dyn Fn(&BridgeEvent) -> bool + Send + Sync>),
}

impl EventFilter {
    pub fn custom(f: impl Fn(&BridgeEvent) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Box::new(f))
    }

    pub fn matches(&self, event: &BridgeEvent) -> bool {
        match self {
            Self::All => true,
            Self::Device(id) => event.device_id() == Some(id.as_str()),
            Self::Function(key) => event.as_change().is_some_and(|c| c.targets(key)),
            Self::Source(source) => event.as_change().is_some_and(|c| c.source == *source),
            Self::ChangesOnly => event.as_change().is_some(),
            Self::Custom(f) => f(event),
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Device(id) => f.debug_tuple("Device").field(id).finish(),
            Self::Function(key) => f.debug_tuple("Function").field(key).finish(),
            Self::Source(source) => f.debug_tuple("Source").field(source).finish(),
            Self::ChangesOnly => f.write_str("ChangesOnly"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BridgeStatus, ChangeEvent, Value};

    fn change(device: &str, function: &str, source: ChangeSource) -> BridgeEvent {
        BridgeEvent::Change(ChangeEvent {
            device_id: device.into(),
            resource_id: "main".into(),
            function_id: function.into(),
            old: None,
            new: Some(Value::from("on")),
            revision: 1,
            source,
        })
    }

    #[test]
    fn device_filter_covers_lifecycle_events() {
        let filter = EventFilter::Device("lamp-1".into());
        assert!(filter.matches(&change("lamp-1", "power", ChangeSource::Poll)));
        assert!(filter.matches(&BridgeEvent::DeviceRemoved {
            device_id: "lamp-1".into(),
            revision: 4
        }));
        assert!(!filter.matches(&change("lamp-2", "power", ChangeSource::Poll)));
        assert!(!filter.matches(&BridgeEvent::Status(BridgeStatus::Connected)));
    }

    #[test]
    fn function_and_source_filters() {
        let key = FunctionKey::new("lamp-1", "main", "power");
        let filter = EventFilter::Function(key);
        assert!(filter.matches(&change("lamp-1", "power", ChangeSource::Poll)));
        assert!(!filter.matches(&change("lamp-1", "brightness", ChangeSource::Poll)));

        let optimistic = EventFilter::Source(ChangeSource::Optimistic);
        assert!(optimistic.matches(&change("lamp-1", "power", ChangeSource::Optimistic)));
        assert!(!optimistic.matches(&change("lamp-1", "power", ChangeSource::Poll)));
    }

    #[test]
    fn custom_filter() {
        let filter = EventFilter::custom(|e| e.revision().is_some_and(|r| r > 0));
        assert!(filter.matches(&change("lamp-1", "power", ChangeSource::Poll)));
        assert!(!filter.matches(&BridgeEvent::Status(BridgeStatus::Stopped)));
        assert!(!EventFilter::ChangesOnly.matches(&BridgeEvent::Status(BridgeStatus::Stopped)));
    }
}
