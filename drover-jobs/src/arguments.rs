//! Validated job arguments

use drover_core::domain::log::ObjectRef;
use drover_core::domain::network::{IpInterface, IpNetwork};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// An uploaded file, held in memory for one execution
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub content: Vec<u8>,
}

impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("name", &self.name)
            .field("size", &self.content.len())
            .finish()
    }
}

/// A typed, validated variable value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    StringList(Vec<String>),
    Object(ObjectRef),
    Objects(Vec<ObjectRef>),
    File(FileUpload),
    Json(Value),
    IpAddress(IpAddr),
    IpInterface(IpInterface),
    IpNetwork(IpNetwork),
}

impl ArgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    /// Form-level representation of the value
    ///
    /// Validating the raw value again yields an equal `ArgValue`, except for
    /// files, which are reduced to their name and size.
    pub fn to_raw(&self) -> Value {
        match self {
            ArgValue::Null => Value::Null,
            ArgValue::String(s) => Value::String(s.clone()),
            ArgValue::Integer(i) => Value::from(*i),
            ArgValue::Boolean(b) => Value::Bool(*b),
            ArgValue::StringList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            ArgValue::Object(obj) => Value::String(obj.id.to_string()),
            ArgValue::Objects(objs) => Value::Array(
                objs.iter()
                    .map(|obj| Value::String(obj.id.to_string()))
                    .collect(),
            ),
            ArgValue::File(file) => serde_json::json!({
                "name": file.name,
                "size": file.content.len(),
            }),
            ArgValue::Json(value) => Value::String(value.to_string()),
            ArgValue::IpAddress(addr) => Value::String(addr.to_string()),
            ArgValue::IpInterface(iface) => Value::String(iface.to_string()),
            ArgValue::IpNetwork(net) => Value::String(net.to_string()),
        }
    }
}

/// Validated arguments of one execution, in field order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(String, ArgValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value, replacing an earlier one of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ArgValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ArgValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str) -> Option<&[String]> {
        match self.get(name) {
            Some(ArgValue::StringList(items)) => Some(items),
            _ => None,
        }
    }

    pub fn object(&self, name: &str) -> Option<&ObjectRef> {
        match self.get(name) {
            Some(ArgValue::Object(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn objects(&self, name: &str) -> Option<&[ObjectRef]> {
        match self.get(name) {
            Some(ArgValue::Objects(objs)) => Some(objs),
            _ => None,
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileUpload> {
        match self.get(name) {
            Some(ArgValue::File(file)) => Some(file),
            _ => None,
        }
    }

    pub fn json(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(ArgValue::Json(value)) => Some(value),
            _ => None,
        }
    }

    pub fn ip_address(&self, name: &str) -> Option<IpAddr> {
        match self.get(name) {
            Some(ArgValue::IpAddress(addr)) => Some(*addr),
            _ => None,
        }
    }

    pub fn ip_interface(&self, name: &str) -> Option<&IpInterface> {
        match self.get(name) {
            Some(ArgValue::IpInterface(iface)) => Some(iface),
            _ => None,
        }
    }

    pub fn ip_network(&self, name: &str) -> Option<&IpNetwork> {
        match self.get(name) {
            Some(ArgValue::IpNetwork(net)) => Some(net),
            _ => None,
        }
    }

    pub fn has_file(&self) -> bool {
        self.values
            .iter()
            .any(|(_, value)| matches!(value, ArgValue::File(_)))
    }

    /// Re-serializes the arguments for display and durable holding
    pub fn to_raw(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_raw()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_insert_keeps_order_and_replaces() {
        let mut args = Arguments::new();
        args.insert("b", ArgValue::Integer(1));
        args.insert("a", ArgValue::Boolean(true));
        args.insert("b", ArgValue::Integer(2));

        assert_eq!(args.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(args.integer("b"), Some(2));
        assert_eq!(args.boolean("a"), Some(true));
        assert_eq!(args.string("a"), None);
    }

    #[test]
    fn test_to_raw() {
        let id = Uuid::new_v4();
        let mut args = Arguments::new();
        args.insert("who", ArgValue::String("world".into()));
        args.insert(
            "device",
            ArgValue::Object(ObjectRef {
                model: "dcim.device".into(),
                id,
                display: "sw1".into(),
            }),
        );
        args.insert("net", ArgValue::IpNetwork("10.0.0.0/8".parse().unwrap()));
        args.insert("extra", ArgValue::Json(serde_json::json!({"a": 1})));

        let raw = args.to_raw();
        assert_eq!(raw["who"], "world");
        assert_eq!(raw["device"], id.to_string());
        assert_eq!(raw["net"], "10.0.0.0/8");
        assert_eq!(raw["extra"], r#"{"a":1}"#);
    }

    #[test]
    fn test_has_file() {
        let mut args = Arguments::new();
        assert!(!args.has_file());
        args.insert(
            "upload",
            ArgValue::File(FileUpload {
                name: "config.txt".into(),
                content: b"hostname sw1".to_vec(),
            }),
        );
        assert!(args.has_file());
        assert_eq!(args.to_raw()["upload"]["size"], 12);
    }
}
