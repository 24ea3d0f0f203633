//! Common types used across CLI modules

use anyhow::{Result, anyhow};
use serde_json::Value;
use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone)]
pub enum IdOrPrefix {
    /// Full UUID
    Full(Uuid),
    /// Prefix that should uniquely identify a resource
    Prefix(String),
}

impl IdOrPrefix {
    /// Parse a string into an IdOrPrefix
    ///
    /// Attempts to parse as a full UUID first, otherwise treats as a prefix
    pub fn parse(input: &str) -> Self {
        if let Ok(uuid) = Uuid::parse_str(input) {
            IdOrPrefix::Full(uuid)
        } else {
            IdOrPrefix::Prefix(input.to_lowercase())
        }
    }

    /// Get the UUID if this is a full ID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }

    pub fn matches(&self, id: &Uuid) -> bool {
        match self {
            IdOrPrefix::Full(uuid) => uuid == id,
            IdOrPrefix::Prefix(prefix) => id.to_string().starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

impl From<&str> for IdOrPrefix {
    fn from(s: &str) -> Self {
        IdOrPrefix::parse(s)
    }
}

/// Parse a `--var key=value` argument
///
/// The value is read as JSON when it parses (numbers, booleans, arrays,
/// quoted strings), otherwise taken verbatim as a string.
pub fn parse_var(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("variable name is empty in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_var_json_values() {
        assert_eq!(parse_var("count=3").unwrap(), ("count".into(), json!(3)));
        assert_eq!(parse_var("dryrun=true").unwrap(), ("dryrun".into(), json!(true)));
        assert_eq!(
            parse_var("tags=[\"a\",\"b\"]").unwrap(),
            ("tags".into(), json!(["a", "b"]))
        );
        assert_eq!(parse_var("who=\"42\"").unwrap(), ("who".into(), json!("42")));
    }

    #[test]
    fn test_parse_var_falls_back_to_string() {
        assert_eq!(parse_var("who=world").unwrap(), ("who".into(), json!("world")));
        assert_eq!(parse_var("expr=a=b").unwrap(), ("expr".into(), json!("a=b")));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".into(), json!("")));
    }

    #[test]
    fn test_parse_var_rejects_malformed() {
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_id_prefix_matching() {
        let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap();
        assert!(IdOrPrefix::parse("3F2A").matches(&id));
        assert!(!IdOrPrefix::parse("3f2b").matches(&id));
        assert_eq!(IdOrPrefix::parse(&id.to_string()).as_uuid(), Some(id));
    }
}
