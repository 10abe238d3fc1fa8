// ── API-to-domain conversion ──
//
// Maps raw metadevice JSON from `afero_api` into candidate `Device`
// structures plus the values observed for them. Function domains are
// resolved here, once; each function is decoded on its own so one bad
// entry never drops the rest of the device.

use std::collections::HashMap;

use afero_api::{FunctionDescriptor, MetaDevice, StateValue};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Device, DeviceInfo, Function, FunctionDomain, FunctionKey, Normalized, Value};

/// Resource id used when a function has no `functionInstance`.
pub const DEFAULT_RESOURCE: &str = "main";

/// A device as observed in one poll: its structure (values unset) and the
/// normalized values reported for it, in declared order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub device: Device,
    pub values: Vec<(FunctionKey, Value)>,
}

/// Resource id for an optional `functionInstance`.
pub fn resource_id(instance: Option<&str>) -> &str {
    instance.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_RESOURCE)
}

/// Best-effort id of a raw entry that failed to decode.
pub fn raw_device_id(raw: &serde_json::Value) -> Option<String> {
    raw.get("id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// Decode one metadevice entry.
pub fn parse_device(raw: &serde_json::Value) -> Result<Candidate, CoreError> {
    let meta: MetaDevice =
        serde_json::from_value(raw.clone()).map_err(|e| CoreError::MalformedPayload {
            device_id: raw_device_id(raw),
            reason: e.to_string(),
        })?;
    if meta.id.is_empty() {
        return Err(CoreError::MalformedPayload {
            device_id: None,
            reason: "metadevice has an empty id".into(),
        });
    }

    let mut device = Device::new(&meta.id, device_type(&meta));
    device.info = device_info(&meta);

    for (index, descriptor) in meta.functions().enumerate() {
        let descriptor = match descriptor {
            Ok(d) => d,
            Err(e) => {
                warn!(device_id = %meta.id, index, error = %e, "skipping malformed function descriptor");
                continue;
            }
        };
        let Some(domain) = domain_from_descriptor(&descriptor) else {
            debug!(
                device_id = %meta.id,
                function = %descriptor.function_class,
                kind = descriptor.kind.as_deref().unwrap_or("-"),
                "function has no scalar domain"
            );
            continue;
        };
        let resource = device.resource_entry(resource_id(descriptor.function_instance.as_deref()));
        if resource.function(&descriptor.function_class).is_none() {
            resource
                .functions
                .push(Function::new(descriptor.function_class, domain));
        }
    }

    let mut observed: HashMap<FunctionKey, Value> = HashMap::new();
    for (index, state) in meta.state_values().enumerate() {
        let state = match state {
            Ok(s) => s,
            Err(e) => {
                warn!(device_id = %meta.id, index, error = %e, "skipping malformed state value");
                continue;
            }
        };
        let Some(value) = Value::from_json(&state.value) else {
            debug!(
                device_id = %meta.id,
                function = %state.function_class,
                "skipping non-scalar state value"
            );
            continue;
        };

        let resource_id = resource_id(state.function_instance.as_deref());
        let resource = device.resource_entry(resource_id);
        let domain = if let Some(function) = resource.function(&state.function_class) {
            function.domain.clone()
        } else {
            let function = Function::inferred(&state.function_class, &value);
            let domain = function.domain.clone();
            resource.functions.push(function);
            domain
        };

        let key = FunctionKey::new(&meta.id, resource_id, &state.function_class);
        match domain.normalize(value) {
            Ok(Normalized::Accepted(value)) => {
                observed.insert(key, value);
            }
            Ok(Normalized::Clamped { value, original }) => {
                warn!(function = %key, original, clamped = %value, "value outside domain, clamped");
                observed.insert(key, value);
            }
            Err(e) => {
                warn!(function = %key, error = %e, "value outside domain, rejected");
            }
        }
    }

    let values = device
        .functions()
        .filter_map(|(key, _)| observed.remove(&key).map(|value| (key, value)))
        .collect();

    Ok(Candidate { device, values })
}

/// Value the server echoed for `key` in a state-write response, if any.
pub fn echoed_value(ack: &serde_json::Value, key: &FunctionKey) -> Option<Value> {
    ack.get("values")?
        .as_array()?
        .iter()
        .filter_map(|raw| serde_json::from_value::<StateValue>(raw.clone()).ok())
        .find(|s| {
            s.function_class == key.function_id
                && resource_id(s.function_instance.as_deref()) == key.resource_id
        })
        .and_then(|s| Value::from_json(&s.value))
}

fn device_type(meta: &MetaDevice) -> String {
    meta.description
        .device
        .device_class
        .clone()
        .or_else(|| meta.type_id.clone())
        .unwrap_or_else(|| "unknown".into())
}

fn device_info(meta: &MetaDevice) -> DeviceInfo {
    let described = &meta.description.device;
    DeviceInfo {
        name: meta
            .friendly_name
            .clone()
            .or_else(|| described.default_name.clone()),
        device_class: described.device_class.clone(),
        model: described.model.clone(),
        manufacturer: described.manufacturer_name.clone(),
        default_image: meta.description.default_image.clone(),
        physical_id: meta.device_id.clone(),
        children: meta.children.clone(),
    }
}

/// Resolve a descriptor into a domain. `None` for shapes with no scalar
/// representation (colour structs, schedules, ...).
fn domain_from_descriptor(descriptor: &FunctionDescriptor) -> Option<FunctionDomain> {
    let range = descriptor
        .values
        .iter()
        .find_map(|v| v.range)
        .filter(|r| r.min.is_finite() && r.max.is_finite() && r.min <= r.max);
    let names: Vec<String> = descriptor
        .values
        .iter()
        .filter_map(|v| v.name.clone())
        .collect();

    let bounded = range.map(|r| FunctionDomain::Numeric {
        min: Some(r.min),
        max: Some(r.max),
        step: r.step,
    });

    match descriptor.kind.as_deref() {
        Some("numeric") => Some(bounded.unwrap_or_else(FunctionDomain::numeric)),
        Some("category" | "enum") if !names.is_empty() => {
            Some(FunctionDomain::Enumerated { values: names })
        }
        Some("boolean") => Some(FunctionDomain::Boolean),
        _ if bounded.is_some() => bounded,
        _ if !names.is_empty() => Some(FunctionDomain::Enumerated { values: names }),
        _ => None,
    }
}
