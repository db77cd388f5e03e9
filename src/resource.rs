use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Prefix reserved for ids minted locally before the server assigns one.
pub const TEMP_ID_PREFIX: &str = "temp-";

pub const ID_FIELD: &str = "id";
pub const LAST_UPDATED_FIELD: &str = "lastUpdated";
pub const RELATED_FIELD: &str = "relatedResources";

/// A JSON object identified by its `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Map<String, Value>);

impl Resource {
    /// Wrap a JSON value; it must be an object carrying a string `id`.
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        match value {
            Value::Object(map) => {
                let res = Resource(map);
                if res.id().is_empty() {
                    return Err(SyncError::State("resource without id"));
                }
                Ok(res)
            }
            _ => Err(SyncError::State("resource is not a JSON object")),
        }
    }

    /// Build a provisional resource from a partial body under a fresh temporary id.
    pub fn provisional(partial: &Value) -> Self {
        let mut map = match partial {
            Value::Object(m) => m.clone(),
            _ => Map::new(),
        };
        map.insert(ID_FIELD.to_string(), Value::String(temp_id()));
        map.insert(LAST_UPDATED_FIELD.to_string(), Value::String(now_rfc3339()));
        Resource(map)
    }

    pub fn id(&self) -> &str {
        self.0.get(ID_FIELD).and_then(Value::as_str).unwrap_or("")
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.0.get(LAST_UPDATED_FIELD).and_then(Value::as_str)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_temporary(&self) -> bool {
        is_temporary_id(self.id())
    }

    /// Ids listed under `relatedResources`, given either as strings or as objects with an `id`.
    pub fn related_ids(&self) -> Vec<String> {
        let Some(Value::Array(items)) = self.0.get(RELATED_FIELD) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get(ID_FIELD).and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn set_id(&mut self, id: &str) {
        self.0.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    }

    pub fn touch(&mut self) {
        self.0
            .insert(LAST_UPDATED_FIELD.to_string(), Value::String(now_rfc3339()));
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub(crate) fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
