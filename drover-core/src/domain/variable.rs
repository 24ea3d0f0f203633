//! Variable definitions
//!
//! A job declares its input as an ordered list of typed variables. The same
//! list drives the generated form schema and the validation of submitted
//! values. Definitions are built once when the job is registered:
//!
//! ```
//! use drover_core::domain::variable::VariableDefinition;
//!
//! let variables = vec![
//!     VariableDefinition::string("who").default("world").max_length(64),
//!     VariableDefinition::object("device", "dcim.device")
//!         .query("site", "$site")
//!         .description("Device at the selected site"),
//! ];
//! assert_eq!(variables[1].filter_references(), vec!["site".to_string()]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A typed input field of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: VariableKind,
    pub label: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
}

/// Kind of a variable together with its kind-specific constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableKind {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        regex: Option<String>,
    },
    Text {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    Integer {
        min_value: Option<i64>,
        max_value: Option<i64>,
    },
    Boolean,
    Choice {
        choices: Vec<Choice>,
    },
    MultiChoice {
        choices: Vec<Choice>,
    },
    Object {
        model: String,
        /// Filter applied when resolving the submitted id; string values of
        /// the form `$field` are replaced by the sibling field's value
        #[serde(default)]
        query: Map<String, Value>,
        display_field: Option<String>,
    },
    MultiObject {
        model: String,
        #[serde(default)]
        query: Map<String, Value>,
        display_field: Option<String>,
    },
    File,
    Json,
    IpAddress,
    IpAddressWithMask,
    IpNetwork,
    /// Boolean flag marking a run as dry-run; may bypass approval
    DryRun,
}

impl VariableKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableKind::String { .. } => "string",
            VariableKind::Text { .. } => "text",
            VariableKind::Integer { .. } => "integer",
            VariableKind::Boolean => "boolean",
            VariableKind::Choice { .. } => "choice",
            VariableKind::MultiChoice { .. } => "multi_choice",
            VariableKind::Object { .. } => "object",
            VariableKind::MultiObject { .. } => "multi_object",
            VariableKind::File => "file",
            VariableKind::Json => "json",
            VariableKind::IpAddress => "ip_address",
            VariableKind::IpAddressWithMask => "ip_address_with_mask",
            VariableKind::IpNetwork => "ip_network",
            VariableKind::DryRun => "dry_run",
        }
    }
}

/// One selectable value of a choice variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

impl<V: Into<String>, L: Into<String>> From<(V, L)> for Choice {
    fn from((value, label): (V, L)) -> Self {
        Choice::new(value, label)
    }
}

impl From<&str> for Choice {
    fn from(value: &str) -> Self {
        Choice::new(value, value)
    }
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        let required = !matches!(kind, VariableKind::Boolean | VariableKind::DryRun);
        Self {
            name: name.into(),
            kind,
            label: None,
            description: None,
            default: None,
            required,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableKind::String {
                min_length: None,
                max_length: None,
                regex: None,
            },
        )
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableKind::Text {
                min_length: None,
                max_length: None,
            },
        )
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableKind::Integer {
                min_value: None,
                max_value: None,
            },
        )
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Boolean)
    }

    pub fn choice<I, C>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Choice>,
    {
        Self::new(
            name,
            VariableKind::Choice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn multi_choice<I, C>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Choice>,
    {
        Self::new(
            name,
            VariableKind::MultiChoice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn object(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableKind::Object {
                model: model.into(),
                query: Map::new(),
                display_field: None,
            },
        )
    }

    pub fn multi_object(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            VariableKind::MultiObject {
                model: model.into(),
                query: Map::new(),
                display_field: None,
            },
        )
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::File)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Json)
    }

    pub fn ip_address(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::IpAddress)
    }

    pub fn ip_address_with_mask(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::IpAddressWithMask)
    }

    pub fn ip_network(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::IpNetwork)
    }

    pub fn dry_run(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::DryRun)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    // Constraint setters below are no-ops on kinds they do not apply to.

    pub fn min_length(mut self, min: usize) -> Self {
        match &mut self.kind {
            VariableKind::String { min_length, .. } | VariableKind::Text { min_length, .. } => {
                *min_length = Some(min)
            }
            _ => {}
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        match &mut self.kind {
            VariableKind::String { max_length, .. } | VariableKind::Text { max_length, .. } => {
                *max_length = Some(max)
            }
            _ => {}
        }
        self
    }

    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        if let VariableKind::String { regex, .. } = &mut self.kind {
            *regex = Some(pattern.into());
        }
        self
    }

    pub fn min_value(mut self, min: i64) -> Self {
        if let VariableKind::Integer { min_value, .. } = &mut self.kind {
            *min_value = Some(min);
        }
        self
    }

    pub fn max_value(mut self, max: i64) -> Self {
        if let VariableKind::Integer { max_value, .. } = &mut self.kind {
            *max_value = Some(max);
        }
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.kind {
            VariableKind::Object { query, .. } | VariableKind::MultiObject { query, .. } => {
                query.insert(key.into(), value.into());
            }
            _ => {}
        }
        self
    }

    pub fn display_field(mut self, field: impl Into<String>) -> Self {
        match &mut self.kind {
            VariableKind::Object { display_field, .. }
            | VariableKind::MultiObject { display_field, .. } => {
                *display_field = Some(field.into())
            }
            _ => {}
        }
        self
    }

    /// Sibling field names referenced as `$field` in the query filter
    pub fn filter_references(&self) -> Vec<String> {
        let query = match &self.kind {
            VariableKind::Object { query, .. } | VariableKind::MultiObject { query, .. } => query,
            _ => return Vec::new(),
        };

        let mut names = Vec::new();
        for value in query.values() {
            collect_references(value, &mut names);
        }
        names
    }

    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.name.replace('_', " "))
    }
}

fn collect_references(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, names);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let who = VariableDefinition::string("who").default("world");
        assert!(who.required);
        assert_eq!(who.default, Some(Value::from("world")));

        let flag = VariableDefinition::boolean("commit");
        assert!(!flag.required);

        let dry_run = VariableDefinition::dry_run("dryrun");
        assert!(!dry_run.required);
    }

    #[test]
    fn test_constraint_setters_apply_to_matching_kind() {
        let var = VariableDefinition::integer("count")
            .min_value(1)
            .max_value(10)
            .min_length(5);
        assert_eq!(
            var.kind,
            VariableKind::Integer {
                min_value: Some(1),
                max_value: Some(10)
            }
        );
    }

    #[test]
    fn test_filter_references() {
        let var = VariableDefinition::multi_object("interfaces", "dcim.interface")
            .query("device", "$device")
            .query("role", serde_json::json!(["$role", "access", "$device"]))
            .query("status", "active");
        assert_eq!(
            var.filter_references(),
            vec!["device".to_string(), "role".to_string()]
        );
        assert!(VariableDefinition::string("x").filter_references().is_empty());
    }

    #[test]
    fn test_definition_serialization_is_tagged() {
        let var = VariableDefinition::choice("color", [("red", "Red"), ("blue", "Blue")])
            .label("Color");
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(json["type"], "choice");
        assert_eq!(json["choices"][1]["value"], "blue");

        let back: VariableDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, var);
    }

    #[test]
    fn test_display_label() {
        assert_eq!(
            VariableDefinition::string("site_name").display_label(),
            "site name"
        );
        assert_eq!(
            VariableDefinition::string("site_name")
                .label("Site")
                .display_label(),
            "Site"
        );
    }
}
