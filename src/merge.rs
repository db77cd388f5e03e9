use serde_json::{Map, Value};

use crate::resource::{ID_FIELD, Resource};

/// Shallow merge of `patch` into `base`: top-level patch keys win, the id is kept.
/// `lastUpdated` is refreshed.
pub fn merge_patch(base: &Resource, patch: &Value) -> Resource {
    let mut out = base.clone();
    if let Value::Object(fields) = patch {
        let map = out.as_map_mut();
        for (k, v) in fields {
            if k == ID_FIELD {
                continue;
            }
            map.insert(k.clone(), v.clone());
        }
    }
    out.touch();
    out
}

/// Body queued for an offline update: `{id, ...patch}`.
pub fn update_payload(id: &str, patch: &Value) -> Value {
    let mut map = match patch {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };
    map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

/// Body queued for an offline delete: `{id}`.
pub fn delete_payload(id: &str) -> Value {
    let mut map = Map::new();
    map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

/// The patch part of a queued update body, i.e. everything but `id`.
pub fn strip_id(payload: &Value) -> Value {
    match payload {
        Value::Object(m) => {
            let mut m = m.clone();
            m.remove(ID_FIELD);
            Value::Object(m)
        }
        other => other.clone(),
    }
}
