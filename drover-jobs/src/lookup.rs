//! Resolution of object references against the surrounding data model

use anyhow::Context;
use async_trait::async_trait;
use drover_core::domain::log::ObjectRef;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Queries objects of a model by attribute filter
///
/// The `id` filter key holds either one id or an array of ids.
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    async fn find(&self, model: &str, filter: &Map<String, Value>)
    -> anyhow::Result<Vec<ObjectRef>>;
}

#[derive(Debug, Clone, Deserialize)]
struct StoredObject {
    id: Uuid,
    display: String,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

/// In-memory object catalog keyed by model name
///
/// Loaded from a JSON document of the form
/// `{"dcim.device": [{"id": "...", "display": "sw1", "site": "..."}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MemoryObjects {
    models: BTreeMap<String, Vec<StoredObject>>,
}

impl MemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read object catalog {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse object catalog {}", path.display()))
    }

    /// Adds an object and returns its reference
    pub fn insert(
        &mut self,
        model: impl Into<String>,
        display: impl Into<String>,
        attributes: Value,
    ) -> ObjectRef {
        let model = model.into();
        let object = StoredObject {
            id: Uuid::new_v4(),
            display: display.into(),
            attributes: match attributes {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        };
        let reference = ObjectRef {
            model: model.clone(),
            id: object.id,
            display: object.display.clone(),
        };
        self.models.entry(model).or_default().push(object);
        reference
    }

    pub fn len(&self) -> usize {
        self.models.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::String(s), other) | (other, Value::String(s)) => *s == other.to_string(),
        _ => a == b,
    }
}

fn matches_filter(candidate: &Value, wanted: &Value) -> bool {
    match wanted {
        Value::Array(options) => options.iter().any(|o| scalar_eq(candidate, o)),
        _ => scalar_eq(candidate, wanted),
    }
}

impl StoredObject {
    fn matches(&self, filter: &Map<String, Value>) -> bool {
        filter.iter().all(|(key, wanted)| {
            if key == "id" {
                return matches_filter(&Value::String(self.id.to_string()), wanted);
            }
            self.attributes
                .get(key)
                .is_some_and(|candidate| matches_filter(candidate, wanted))
        })
    }
}

#[async_trait]
impl ObjectLookup for MemoryObjects {
    async fn find(
        &self,
        model: &str,
        filter: &Map<String, Value>,
    ) -> anyhow::Result<Vec<ObjectRef>> {
        let Some(objects) = self.models.get(model) else {
            return Ok(Vec::new());
        };

        Ok(objects
            .iter()
            .filter(|obj| obj.matches(filter))
            .map(|obj| ObjectRef {
                model: model.to_string(),
                id: obj.id,
                display: obj.display.clone(),
            })
            .collect())
    }
}
