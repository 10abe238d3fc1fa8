// ── Device, resource and function types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FunctionDomain, FunctionKey, Value};

/// Descriptive metadata. Carried on the device, never part of change events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub device_class: Option<String>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub default_image: Option<String>,
    /// Physical device id shared by a parent and its children.
    pub physical_id: Option<String>,
    pub children: Vec<String>,
}

/// A single controllable or observable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub domain: FunctionDomain,
    /// `None` until a value has been observed.
    pub value: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
    /// The domain was guessed from observed values, not declared.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inferred: bool,
}

impl Function {
    pub fn new(id: impl Into<String>, domain: FunctionDomain) -> Self {
        Self {
            id: id.into(),
            domain,
            value: None,
            updated_at: None,
            inferred: false,
        }
    }

    /// A function seen only in state, with a domain guessed from `value`.
    pub fn inferred(id: impl Into<String>, value: &Value) -> Self {
        Self {
            inferred: true,
            ..Self::new(id, FunctionDomain::infer(value))
        }
    }
}

/// An addressable sub-unit of a device, e.g. one outlet of a power strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub functions: Vec<Function>,
}

impl Resource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, function_id: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == function_id)
    }

    pub(crate) fn function_mut(&mut self, function_id: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.id == function_id)
    }
}

/// A device as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub device_type: String,
    pub info: DeviceInfo,
    /// Resources in declared order.
    pub resources: Vec<Resource>,
    /// Registry revision of the last accepted mutation touching this device.
    pub revision: u64,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            device_type: device_type.into(),
            info: DeviceInfo::default(),
            resources: Vec::new(),
            revision: 0,
            discovered_at: now,
            updated_at: now,
        }
    }

    /// Display name: the friendly name if set, else the id.
    pub fn name(&self) -> &str {
        self.info.name.as_deref().unwrap_or(&self.id)
    }

    pub fn resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == resource_id)
    }

    pub(crate) fn resource_mut(&mut self, resource_id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == resource_id)
    }

    /// Look up a resource, appending an empty one if absent.
    pub(crate) fn resource_entry(&mut self, resource_id: &str) -> &mut Resource {
        let pos = match self.resources.iter().position(|r| r.id == resource_id) {
            Some(pos) => pos,
            None => {
                self.resources.push(Resource::new(resource_id));
                self.resources.len() - 1
            }
        };
        &mut self.resources[pos]
    }

    pub fn function(&self, resource_id: &str, function_id: &str) -> Option<&Function> {
        self.resource(resource_id)?.function(function_id)
    }

    /// Every function with its key, in declared order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionKey, &Function)> {
        self.resources.iter().flat_map(move |r| {
            r.functions
                .iter()
                .map(move |f| (FunctionKey::new(&self.id, &r.id, &f.id), f))
        })
    }

    /// `true` if `other` has the same metadata and function layout,
    /// ignoring values and timestamps.
    pub(crate) fn same_shape(&self, other: &Device) -> bool {
        self.shape_matches(other, false)
    }

    /// Like [`same_shape`](Self::same_shape), but inferred domains may differ.
    pub(crate) fn same_layout(&self, other: &Device) -> bool {
        self.shape_matches(other, true)
    }

    fn shape_matches(&self, other: &Device, loose: bool) -> bool {
        self.device_type == other.device_type
            && self.info == other.info
            && self.resources.len() == other.resources.len()
            && self.resources.iter().zip(&other.resources).all(|(a, b)| {
                a.id == b.id
                    && a.functions.len() == b.functions.len()
                    && a
                        .functions
                        .iter()
                        .zip(&b.functions)
                        .all(|(fa, fb)| {
                            fa.id == fb.id
                                && fa.inferred == fb.inferred
                                && ((loose && fa.inferred) || fa.domain == fb.domain)
                        })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> Device {
        let mut device = Device::new("lamp-1", "light");
        device
            .resource_entry("main")
            .functions
            .push(Function::new("power", FunctionDomain::enumerated(["on", "off"])));
        device
            .resource_entry("main")
            .functions
            .push(Function::new("brightness", FunctionDomain::numeric()));
        device
    }

    #[test]
    fn functions_iterate_in_declared_order() {
        let device = lamp();
        let keys: Vec<String> = device.functions().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["lamp-1/main/power", "lamp-1/main/brightness"]);
        assert_eq!(device.resources.len(), 1);
    }

    #[test]
    fn shape_ignores_values() {
        let a = lamp();
        let mut b = lamp();
        b.resources[0].functions[0].value = Some(Value::from("on"));
        assert!(a.same_shape(&b));

        b.info.name = Some("Desk".into());
        assert!(!a.same_shape(&b));
    }

    #[test]
    fn layout_tolerates_grown_inferred_domains() {
        let mut a = lamp();
        a.resource_entry("main")
            .functions
            .push(Function::inferred("wifi-ssid", &Value::from("home")));
        let mut b = a.clone();
        b.resources[0].functions[2].domain = FunctionDomain::enumerated(["home", "work"]);

        assert!(!a.same_shape(&b));
        assert!(a.same_layout(&b));

        b.resources[0].functions[1].domain = FunctionDomain::Boolean;
        assert!(!a.same_layout(&b));
    }

    #[test]
    fn name_falls_back_to_id() {
        let mut device = lamp();
        assert_eq!(device.name(), "lamp-1");
        device.info.name = Some("Desk lamp".into());
        assert_eq!(device.name(), "Desk lamp");
    }
}
