//! Validation of submitted variable values and form schema generation
//!
//! Fields are processed in the job's `field_order` first, then the remaining
//! fields in declaration order. Object filters may reference fields that
//! come earlier in that order as `$field`; the reference is replaced with
//! the already-validated value before the lookup runs.

use drover_core::domain::log::ObjectRef;
use drover_core::domain::network::{IpInterface, IpNetwork};
use drover_core::domain::variable::{Choice, VariableDefinition, VariableKind};
use drover_core::dto::job::FieldError;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::net::IpAddr;
use uuid::Uuid;

use crate::arguments::{ArgValue, Arguments, FileUpload};
use crate::lookup::ObjectLookup;

const REQUIRED: &str = "This field is required.";

/// The variables of one job together with their effective order
#[derive(Debug, Clone, Copy)]
pub struct VariableSchema<'a> {
    variables: &'a [VariableDefinition],
    field_order: &'a [String],
}

impl<'a> VariableSchema<'a> {
    pub fn new(variables: &'a [VariableDefinition], field_order: &'a [String]) -> Self {
        Self {
            variables,
            field_order,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Definitions in the order they are validated and displayed
    pub fn ordered(&self) -> Vec<&'a VariableDefinition> {
        let mut out: Vec<&VariableDefinition> = Vec::with_capacity(self.variables.len());
        for name in self.field_order {
            if let Some(def) = self.get(name) {
                if !out.iter().any(|d| d.name == def.name) {
                    out.push(def);
                }
            }
        }
        for def in self.variables {
            if !out.iter().any(|d| d.name == def.name) {
                out.push(def);
            }
        }
        out
    }

    /// Problems that make the definitions unusable, one message each
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for def in self.variables {
            if !is_valid_name(&def.name) {
                problems.push(format!("invalid variable name '{}'", def.name));
            }
            if !seen.insert(def.name.as_str()) {
                problems.push(format!("duplicate variable '{}'", def.name));
            }
        }

        for name in self.field_order {
            if self.get(name).is_none() {
                problems.push(format!("field_order names unknown variable '{}'", name));
            }
        }

        let dry_runs = self
            .variables
            .iter()
            .filter(|v| matches!(v.kind, VariableKind::DryRun))
            .count();
        if dry_runs > 1 {
            problems.push(format!("{} dry-run variables declared, at most one allowed", dry_runs));
        }

        let ordered = self.ordered();
        for (position, def) in ordered.iter().enumerate() {
            for reference in def.filter_references() {
                if reference == def.name {
                    problems.push(format!("'{}' filters on itself", def.name));
                } else if self.get(&reference).is_none() {
                    problems.push(format!(
                        "'{}' filters on unknown variable '${}'",
                        def.name, reference
                    ));
                } else if !ordered[..position].iter().any(|d| d.name == reference) {
                    problems.push(format!(
                        "'{}' filters on '${}', which must come earlier in field order",
                        def.name, reference
                    ));
                }
            }
            problems.extend(kind_problems(def));
        }

        problems
    }

    /// Validates and coerces raw submitted values
    ///
    /// The returned arguments hold exactly one value per definition.
    pub async fn validate(
        &self,
        raw: &Map<String, Value>,
        lookup: &dyn ObjectLookup,
    ) -> Result<Arguments, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut args = Arguments::new();

        for key in raw.keys() {
            if self.get(key).is_none() {
                errors.push(FieldError::new(key, "Unknown field."));
            }
        }

        for def in self.ordered() {
            let value = raw
                .get(&def.name)
                .filter(|v| !is_missing(&def.kind, v))
                .or_else(|| def.default.as_ref().filter(|v| !is_missing(&def.kind, v)));

            let Some(value) = value else {
                if def.required {
                    errors.push(FieldError::new(&def.name, REQUIRED));
                } else {
                    args.insert(&def.name, empty_value(&def.kind));
                }
                continue;
            };

            match coerce(def, value, &args, lookup).await {
                Ok(coerced) => args.insert(&def.name, coerced),
                Err(message) => errors.push(FieldError::new(&def.name, message)),
            }
        }

        if errors.is_empty() {
            Ok(args)
        } else {
            Err(errors)
        }
    }

    /// JSON-Schema-like description of the form for a UI
    pub fn form_schema(&self) -> Value {
        let ordered = self.ordered();
        let mut properties = Map::new();
        let mut required = Vec::new();

        for def in &ordered {
            properties.insert(def.name.clone(), property_schema(def));
            if def.required {
                required.push(Value::String(def.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "x-field-order": ordered.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        })
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn kind_problems(def: &VariableDefinition) -> Vec<String> {
    let mut problems = Vec::new();
    let name = &def.name;

    match &def.kind {
        VariableKind::String {
            min_length,
            max_length,
            regex,
        } => {
            if let (Some(min), Some(max)) = (min_length, max_length) {
                if min > max {
                    problems.push(format!("'{}' has min_length above max_length", name));
                }
            }
            if let Some(pattern) = regex {
                if let Err(e) = Regex::new(pattern) {
                    problems.push(format!("'{}' has an invalid regex: {}", name, e));
                }
            }
        }
        VariableKind::Text {
            min_length,
            max_length,
        } => {
            if let (Some(min), Some(max)) = (min_length, max_length) {
                if min > max {
                    problems.push(format!("'{}' has min_length above max_length", name));
                }
            }
        }
        VariableKind::Integer {
            min_value,
            max_value,
        } => {
            if let (Some(min), Some(max)) = (min_value, max_value) {
                if min > max {
                    problems.push(format!("'{}' has min_value above max_value", name));
                }
            }
        }
        VariableKind::Choice { choices } | VariableKind::MultiChoice { choices } => {
            if choices.is_empty() {
                problems.push(format!("'{}' has no choices", name));
            }
            if let Some(default) = &def.default {
                let defaults = match default {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                for d in defaults {
                    let value = scalar_string(&d).unwrap_or_default();
                    if !choices.iter().any(|c| c.value == value) {
                        problems.push(format!(
                            "'{}' default '{}' is not one of its choices",
                            name, value
                        ));
                    }
                }
            }
        }
        _ => {}
    }

    problems
}

/// An empty list only counts as absent for list-valued kinds
fn is_missing(kind: &VariableKind, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => {
            items.is_empty()
                && matches!(
                    kind,
                    VariableKind::MultiChoice { .. } | VariableKind::MultiObject { .. }
                )
        }
        _ => false,
    }
}

fn empty_value(kind: &VariableKind) -> ArgValue {
    match kind {
        VariableKind::Boolean | VariableKind::DryRun => ArgValue::Boolean(false),
        VariableKind::MultiChoice { .. } => ArgValue::StringList(Vec::new()),
        VariableKind::MultiObject { .. } => ArgValue::Objects(Vec::new()),
        _ => ArgValue::Null,
    }
}

/// String form of a scalar as an HTML form would submit it
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expect_string(value: &Value) -> Result<String, String> {
    scalar_string(value).ok_or_else(|| "Enter a text value.".to_string())
}

fn check_length(s: &str, min: Option<usize>, max: Option<usize>) -> Result<(), String> {
    let len = s.chars().count();
    if let Some(min) = min {
        if len < min {
            return Err(format!(
                "Ensure this value has at least {} characters (it has {}).",
                min, len
            ));
        }
    }
    if let Some(max) = max {
        if len > max {
            return Err(format!(
                "Ensure this value has at most {} characters (it has {}).",
                max, len
            ));
        }
    }
    Ok(())
}

fn parse_integer(value: &Value) -> Result<i64, String> {
    let invalid = || "Enter a whole number.".to_string();
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
                .ok_or_else(invalid),
        },
        Value::String(s) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn parse_boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Ok(true),
            "false" | "off" | "0" | "no" => Ok(false),
            _ => Err(format!("'{}' is not a valid boolean.", s)),
        },
        _ => Err("Enter a boolean value.".to_string()),
    }
}

fn check_choice(value: &str, choices: &[Choice]) -> Result<(), String> {
    if choices.iter().any(|c| c.value == value) {
        Ok(())
    } else {
        Err(format!(
            "Select a valid choice. {} is not one of the available choices.",
            value
        ))
    }
}

fn object_id(value: &Value) -> Result<Uuid, String> {
    let raw = match value {
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    raw.and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| "Enter a valid object id.".to_string())
}

fn listify(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Replaces `$field` tokens with the raw form of validated sibling values
fn substitute(value: &Value, args: &Arguments) -> Result<Value, String> {
    match value {
        Value::String(s) => match s.strip_prefix('$').filter(|name| !name.is_empty()) {
            Some(name) => match args.get(name) {
                Some(arg) if !arg.is_null() => Ok(arg.to_raw()),
                _ => Err(format!(
                    "Depends on '{}', which has no valid value.",
                    name
                )),
            },
            None => Ok(value.clone()),
        },
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match substitute(item, args)? {
                    Value::Array(nested) => out.extend(nested),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

fn build_filter(
    query: &Map<String, Value>,
    args: &Arguments,
    ids: Value,
) -> Result<Map<String, Value>, String> {
    let mut filter = Map::new();
    for (key, value) in query {
        filter.insert(key.clone(), substitute(value, args)?);
    }
    filter.insert("id".to_string(), ids);
    Ok(filter)
}

async fn find_objects(
    lookup: &dyn ObjectLookup,
    model: &str,
    filter: &Map<String, Value>,
) -> Result<Vec<ObjectRef>, String> {
    lookup
        .find(model, filter)
        .await
        .map_err(|e| format!("Object lookup failed: {}", e))
}

async fn coerce(
    def: &VariableDefinition,
    value: &Value,
    args: &Arguments,
    lookup: &dyn ObjectLookup,
) -> Result<ArgValue, String> {
    match &def.kind {
        VariableKind::String {
            min_length,
            max_length,
            regex,
        } => {
            let s = expect_string(value)?;
            check_length(&s, *min_length, *max_length)?;
            if let Some(pattern) = regex {
                let re = Regex::new(pattern).map_err(|e| format!("Invalid pattern: {}", e))?;
                if !re.is_match(&s) {
                    return Err(format!("Value must match pattern {}", pattern));
                }
            }
            Ok(ArgValue::String(s))
        }
        VariableKind::Text {
            min_length,
            max_length,
        } => {
            let s = expect_string(value)?;
            check_length(&s, *min_length, *max_length)?;
            Ok(ArgValue::String(s))
        }
        VariableKind::Integer {
            min_value,
            max_value,
        } => {
            let i = parse_integer(value)?;
            if let Some(min) = min_value {
                if i < *min {
                    return Err(format!(
                        "Ensure this value is greater than or equal to {}.",
                        min
                    ));
                }
            }
            if let Some(max) = max_value {
                if i > *max {
                    return Err(format!(
                        "Ensure this value is less than or equal to {}.",
                        max
                    ));
                }
            }
            Ok(ArgValue::Integer(i))
        }
        VariableKind::Boolean | VariableKind::DryRun => Ok(ArgValue::Boolean(parse_boolean(value)?)),
        VariableKind::Choice { choices } => {
            let s = expect_string(value)?;
            check_choice(&s, choices)?;
            Ok(ArgValue::String(s))
        }
        VariableKind::MultiChoice { choices } => {
            let mut selected = Vec::new();
            for item in listify(value) {
                let s = expect_string(&item)?;
                check_choice(&s, choices)?;
                if !selected.contains(&s) {
                    selected.push(s);
                }
            }
            Ok(ArgValue::StringList(selected))
        }
        VariableKind::Object { model, query, .. } => {
            let id = object_id(value)?;
            let filter = build_filter(query, args, Value::String(id.to_string()))?;
            let mut found = find_objects(lookup, model, &filter).await?;
            match found.len() {
                1 => Ok(ArgValue::Object(found.remove(0))),
                0 => Err(format!(
                    "Select a valid choice. {} is not one of the available choices.",
                    id
                )),
                n => Err(format!("{} objects matched where exactly one was expected.", n)),
            }
        }
        VariableKind::MultiObject { model, query, .. } => {
            let mut ids: Vec<Uuid> = Vec::new();
            for item in listify(value) {
                let id = object_id(&item)?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            let id_values = Value::Array(ids.iter().map(|id| Value::String(id.to_string())).collect());
            let filter = build_filter(query, args, id_values)?;
            let found = find_objects(lookup, model, &filter).await?;
            if found.len() != ids.len() {
                let missing: Vec<String> = ids
                    .iter()
                    .filter(|id| !found.iter().any(|o| o.id == **id))
                    .map(Uuid::to_string)
                    .collect();
                return Err(format!(
                    "Select valid choices. {} not among the available choices.",
                    missing.join(", ")
                ));
            }
            // Keep the submitted order
            let ordered = ids
                .iter()
                .filter_map(|id| found.iter().find(|o| o.id == *id).cloned())
                .collect();
            Ok(ArgValue::Objects(ordered))
        }
        VariableKind::File => {
            let map = value
                .as_object()
                .ok_or_else(|| "Submit a file with a name and content.".to_string())?;
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| "The submitted file has no name.".to_string())?;
            let content = map
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| "The submitted file has no content.".to_string())?;
            Ok(ArgValue::File(FileUpload {
                name: name.to_string(),
                content: content.as_bytes().to_vec(),
            }))
        }
        VariableKind::Json => match value {
            Value::String(s) => serde_json::from_str(s)
                .map(ArgValue::Json)
                .map_err(|_| "Enter a valid JSON.".to_string()),
            other => Ok(ArgValue::Json(other.clone())),
        },
        VariableKind::IpAddress => {
            let s = expect_string(value)?;
            s.trim()
                .parse::<IpAddr>()
                .map(ArgValue::IpAddress)
                .map_err(|_| format!("'{}' is not a valid IP address.", s))
        }
        VariableKind::IpAddressWithMask => {
            let s = expect_string(value)?;
            s.parse::<IpInterface>()
                .map(ArgValue::IpInterface)
                .map_err(|e| e.to_string())
        }
        VariableKind::IpNetwork => {
            let s = expect_string(value)?;
            s.parse::<IpNetwork>()
                .map(ArgValue::IpNetwork)
                .map_err(|e| e.to_string())
        }
    }
}

fn property_schema(def: &VariableDefinition) -> Value {
    let mut prop = Map::new();
    prop.insert("title".into(), Value::String(def.display_label()));
    if let Some(description) = &def.description {
        prop.insert("description".into(), Value::String(description.clone()));
    }
    if let Some(default) = &def.default {
        prop.insert("default".into(), default.clone());
    }
    prop.insert("x-kind".into(), Value::from(def.kind.type_name()));

    match &def.kind {
        VariableKind::String {
            min_length,
            max_length,
            regex,
        } => {
            prop.insert("type".into(), json!("string"));
            if let Some(min) = min_length {
                prop.insert("minLength".into(), json!(min));
            }
            if let Some(max) = max_length {
                prop.insert("maxLength".into(), json!(max));
            }
            if let Some(pattern) = regex {
                prop.insert("pattern".into(), json!(pattern));
            }
        }
        VariableKind::Text {
            min_length,
            max_length,
        } => {
            prop.insert("type".into(), json!("string"));
            prop.insert("format".into(), json!("textarea"));
            if let Some(min) = min_length {
                prop.insert("minLength".into(), json!(min));
            }
            if let Some(max) = max_length {
                prop.insert("maxLength".into(), json!(max));
            }
        }
        VariableKind::Integer {
            min_value,
            max_value,
        } => {
            prop.insert("type".into(), json!("integer"));
            if let Some(min) = min_value {
                prop.insert("minimum".into(), json!(min));
            }
            if let Some(max) = max_value {
                prop.insert("maximum".into(), json!(max));
            }
        }
        VariableKind::Boolean | VariableKind::DryRun => {
            prop.insert("type".into(), json!("boolean"));
        }
        VariableKind::Choice { choices } => {
            prop.insert("type".into(), json!("string"));
            prop.insert("enum".into(), choice_values(choices));
            prop.insert("x-choices".into(), json!(choices));
        }
        VariableKind::MultiChoice { choices } => {
            prop.insert("type".into(), json!("array"));
            prop.insert("items".into(), json!({"type": "string", "enum": choice_values(choices)}));
            prop.insert("uniqueItems".into(), json!(true));
            prop.insert("x-choices".into(), json!(choices));
        }
        VariableKind::Object {
            model,
            query,
            display_field,
        } => {
            prop.insert("type".into(), json!("string"));
            prop.insert("format".into(), json!("uuid"));
            insert_object_hints(&mut prop, model, query, display_field.as_deref());
        }
        VariableKind::MultiObject {
            model,
            query,
            display_field,
        } => {
            prop.insert("type".into(), json!("array"));
            prop.insert("items".into(), json!({"type": "string", "format": "uuid"}));
            insert_object_hints(&mut prop, model, query, display_field.as_deref());
        }
        VariableKind::File => {
            prop.insert("type".into(), json!("object"));
            prop.insert("format".into(), json!("file"));
        }
        VariableKind::Json => {
            prop.insert("format".into(), json!("json"));
        }
        VariableKind::IpAddress => {
            prop.insert("type".into(), json!("string"));
            prop.insert("format".into(), json!("ip-address"));
        }
        VariableKind::IpAddressWithMask => {
            prop.insert("type".into(), json!("string"));
            prop.insert("format".into(), json!("ip-interface"));
        }
        VariableKind::IpNetwork => {
            prop.insert("type".into(), json!("string"));
            prop.insert("format".into(), json!("ip-network"));
        }
    }

    Value::Object(prop)
}

fn choice_values(choices: &[Choice]) -> Value {
    Value::Array(choices.iter().map(|c| Value::String(c.value.clone())).collect())
}

fn insert_object_hints(
    prop: &mut Map<String, Value>,
    model: &str,
    query: &Map<String, Value>,
    display_field: Option<&str>,
) {
    prop.insert("x-model".into(), json!(model));
    if !query.is_empty() {
        prop.insert("x-query".into(), Value::Object(query.clone()));
    }
    prop.insert(
        "x-display-field".into(),
        json!(display_field.unwrap_or("display")),
    );
}
