//! Job table parser
//!
//! Turns a table passed to `jobs.register{...}` into job metadata and
//! variable definitions without running any of its functions.

use anyhow::{Context, Result, anyhow, bail};
use drover_core::domain::job::JobMeta;
use drover_core::domain::variable::{Choice, VariableDefinition, VariableKind};
use mlua::{Lua, LuaSerdeExt, Table, Value};
use serde_json::Map;

/// Optional lifecycle functions present on a job table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    pub before_start: bool,
    pub on_success: bool,
    pub on_failure: bool,
    pub after_return: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedJob {
    pub class_name: String,
    pub meta: JobMeta,
    pub variables: Vec<VariableDefinition>,
    pub hooks: Hooks,
}

/// Parse a registered job table
///
/// # Example
/// ```
/// use drover_lua::parser::parse_job;
/// use drover_lua::sandbox::{create_sandbox, registered_jobs};
///
/// let lua = create_sandbox()?;
/// lua.load(r#"
///     jobs.register {
///         name = "Backup configs",
///         singleton = true,
///         variables = {
///             { name = "device", type = "object", model = "dcim.device" },
///             { name = "commit", type = "boolean" },
///         },
///         run = function(args) end,
///     }
/// "#).exec()?;
///
/// let job = parse_job(&lua, &registered_jobs(&lua)?[0])?;
/// assert_eq!(job.class_name, "BackupConfigs");
/// assert!(job.meta.singleton);
/// assert_eq!(job.variables.len(), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_job(lua: &Lua, table: &Table) -> Result<ParsedJob> {
    let name: String = table
        .get::<Option<String>>("name")
        .context("Field 'name' must be a string")?
        .ok_or_else(|| anyhow!("Job must have a 'name' field"))?;

    if !matches!(table.get::<Value>("run")?, Value::Function(_)) {
        bail!("Job '{}' must have a 'run' function", name);
    }

    let class_name = match table
        .get::<Option<String>>("class")
        .context("Field 'class' must be a string")?
    {
        Some(class) => class,
        None => class_name_for(&name)
            .ok_or_else(|| anyhow!("Cannot derive a class name from '{}'", name))?,
    };

    let mut meta = JobMeta::new(&name);
    meta.description = optional_string(table, "description")?;
    meta.grouping = optional_string(table, "grouping")?;
    meta.approval_required = flag(table, "approval_required")?;
    meta.sensitive_variables = flag(table, "sensitive_variables")?;
    meta.singleton = flag(table, "singleton")?;
    meta.hidden = flag(table, "hidden")?;
    meta.queue = optional_string(table, "queue")?;
    meta.soft_time_limit = table
        .get::<Option<u64>>("soft_time_limit")
        .context("Field 'soft_time_limit' must be a number of seconds")?;
    meta.time_limit = table
        .get::<Option<u64>>("time_limit")
        .context("Field 'time_limit' must be a number of seconds")?;
    meta.field_order = table
        .get::<Option<Vec<String>>>("field_order")
        .context("Field 'field_order' must be an array of variable names")?
        .unwrap_or_default();

    let variables = parse_variables(lua, table)?;

    let hooks = Hooks {
        before_start: has_function(table, "before_start")?,
        on_success: has_function(table, "on_success")?,
        on_failure: has_function(table, "on_failure")?,
        after_return: has_function(table, "after_return")?,
    };

    Ok(ParsedJob {
        class_name,
        meta,
        variables,
        hooks,
    })
}

/// `"Backup configs"` becomes `BackupConfigs`
fn class_name_for(name: &str) -> Option<String> {
    let class: String = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    (!class.is_empty()).then_some(class)
}

fn optional_string(table: &Table, key: &str) -> Result<Option<String>> {
    table
        .get::<Option<String>>(key)
        .with_context(|| format!("Field '{}' must be a string", key))
}

fn flag(table: &Table, key: &str) -> Result<bool> {
    Ok(table
        .get::<Option<bool>>(key)
        .with_context(|| format!("Field '{}' must be a boolean", key))?
        .unwrap_or(false))
}

fn has_function(table: &Table, key: &str) -> Result<bool> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(false),
        Value::Function(_) => Ok(true),
        _ => bail!("Field '{}' must be a function", key),
    }
}

/// Parse the ordered 'variables' array
fn parse_variables(lua: &Lua, job: &Table) -> Result<Vec<VariableDefinition>> {
    let table = match job.get::<Value>("variables")? {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(table) => table,
        _ => bail!("Field 'variables' must be an array of variable definitions"),
    };

    let mut variables = Vec::new();
    for entry in table.sequence_values::<Table>() {
        let var_table = entry.context("Failed to read variable entry")?;
        variables.push(parse_variable(lua, &var_table)?);
    }
    Ok(variables)
}

fn parse_variable(lua: &Lua, table: &Table) -> Result<VariableDefinition> {
    let name: String = table
        .get::<Option<String>>("name")
        .context("Variable 'name' must be a string")?
        .ok_or_else(|| anyhow!("Variable must have a 'name' field"))?;

    let type_name: String = table
        .get::<Option<String>>("type")
        .with_context(|| format!("Variable '{}' field 'type' must be a string", name))?
        .ok_or_else(|| anyhow!("Variable '{}' must have a 'type' field", name))?;

    let kind = parse_kind(lua, table, &name, &type_name)?;
    let mut var = VariableDefinition::new(name.clone(), kind);

    if let Some(label) = optional_string(table, "label")? {
        var = var.label(label);
    }
    if let Some(description) = optional_string(table, "description")? {
        var = var.description(description);
    }

    match table.get::<Value>("default")? {
        Value::Nil => {}
        value => {
            let default: serde_json::Value = lua
                .from_value(value)
                .with_context(|| format!("Variable '{}' has an unsupported default", name))?;
            var = var.default(default);
        }
    }

    // `optional = true` is accepted as the inverse of `required`
    if let Some(required) = table.get::<Option<bool>>("required")? {
        var.required = required;
    } else if table.get::<Option<bool>>("optional")?.unwrap_or(false) {
        var.required = false;
    }

    Ok(var)
}

fn parse_kind(lua: &Lua, table: &Table, name: &str, type_name: &str) -> Result<VariableKind> {
    let context = || format!("Invalid constraints on variable '{}'", name);

    let kind = match type_name {
        "string" => VariableKind::String {
            min_length: table.get("min_length").with_context(context)?,
            max_length: table.get("max_length").with_context(context)?,
            regex: table.get("regex").with_context(context)?,
        },
        "text" => VariableKind::Text {
            min_length: table.get("min_length").with_context(context)?,
            max_length: table.get("max_length").with_context(context)?,
        },
        "integer" | "int" => VariableKind::Integer {
            min_value: table.get("min_value").with_context(context)?,
            max_value: table.get("max_value").with_context(context)?,
        },
        "boolean" | "bool" => VariableKind::Boolean,
        "choice" => VariableKind::Choice {
            choices: parse_choices(table, name)?,
        },
        "multi_choice" => VariableKind::MultiChoice {
            choices: parse_choices(table, name)?,
        },
        "object" | "multi_object" => {
            let model: String = table
                .get::<Option<String>>("model")
                .with_context(context)?
                .ok_or_else(|| anyhow!("Variable '{}' must have a 'model' field", name))?;
            let query: Map<String, serde_json::Value> = match table.get::<Value>("query")? {
                Value::Nil => Map::new(),
                value => lua
                    .from_value(value)
                    .with_context(|| format!("Variable '{}' has an invalid query", name))?,
            };
            let display_field: Option<String> = table.get("display_field").with_context(context)?;
            if type_name == "object" {
                VariableKind::Object {
                    model,
                    query,
                    display_field,
                }
            } else {
                VariableKind::MultiObject {
                    model,
                    query,
                    display_field,
                }
            }
        }
        "file" => VariableKind::File,
        "json" => VariableKind::Json,
        "ip_address" => VariableKind::IpAddress,
        "ip_address_with_mask" => VariableKind::IpAddressWithMask,
        "ip_network" => VariableKind::IpNetwork,
        "dry_run" => VariableKind::DryRun,
        other => bail!("Variable '{}' has unknown type '{}'", name, other),
    };

    Ok(kind)
}

/// Choices are either plain values or `{ value, label }` pairs
fn parse_choices(table: &Table, name: &str) -> Result<Vec<Choice>> {
    let choices = match table.get::<Value>("choices")? {
        Value::Table(choices) => choices,
        _ => bail!("Variable '{}' must have a 'choices' array", name),
    };

    let mut out = Vec::new();
    for entry in choices.sequence_values::<Value>() {
        let choice = match entry.context("Failed to read choice entry")? {
            Value::Table(pair) => {
                let value: String = match pair.get::<Option<String>>("value")? {
                    Some(value) => value,
                    None => pair
                        .get::<String>(1)
                        .with_context(|| format!("Invalid choice on variable '{}'", name))?,
                };
                let label = match pair.get::<Option<String>>("label")? {
                    Some(label) => label,
                    None => pair
                        .get::<Option<String>>(2)?
                        .unwrap_or_else(|| value.clone()),
                };
                Choice::new(value, label)
            }
            Value::String(s) => {
                let value = s.to_str()?.to_string();
                Choice::new(value.clone(), value)
            }
            Value::Integer(i) => Choice::from(i.to_string().as_str()),
            _ => bail!("Invalid choice on variable '{}'", name),
        };
        out.push(choice);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{create_sandbox, registered_jobs};

    fn parse(source: &str) -> Result<ParsedJob> {
        let lua = create_sandbox().unwrap();
        lua.load(source).exec().unwrap();
        let jobs = registered_jobs(&lua).unwrap();
        parse_job(&lua, &jobs[0])
    }

    #[test]
    fn test_parse_minimal_job() {
        let job = parse(
            r#"
            jobs.register {
                name = "Greet",
                run = function(args) return "hi" end,
            }
        "#,
        )
        .unwrap();

        assert_eq!(job.class_name, "Greet");
        assert_eq!(job.meta.name, "Greet");
        assert!(job.variables.is_empty());
        assert_eq!(job.hooks, Hooks::default());
    }

    #[test]
    fn test_parse_full_job() {
        let job = parse(
            r#"
            jobs.register {
                name = "Backup configs",
                class = "BackupConfigs",
                description = "Pulls running configs",
                grouping = "Backups",
                approval_required = true,
                sensitive_variables = true,
                queue = "network",
                soft_time_limit = 30,
                time_limit = 60,
                field_order = { "site", "device" },
                variables = {
                    { name = "device", type = "object", model = "dcim.device",
                      query = { site = "$site" } },
                    { name = "site", type = "object", model = "dcim.site" },
                    { name = "mode", type = "choice", choices = { "fast", { "safe", "Safe mode" } },
                      default = "safe" },
                    { name = "count", type = "integer", min_value = 1, optional = true },
                    { name = "dryrun", type = "dry_run" },
                },
                run = function(args) end,
                before_start = function(args) end,
                on_failure = function(failure) end,
            }
        "#,
        )
        .unwrap();

        assert_eq!(job.class_name, "BackupConfigs");
        assert!(job.meta.approval_required);
        assert!(job.meta.sensitive_variables);
        assert_eq!(job.meta.queue.as_deref(), Some("network"));
        assert_eq!(job.meta.soft_time_limit, Some(30));
        assert_eq!(job.meta.time_limit, Some(60));
        assert_eq!(job.meta.field_order, vec!["site", "device"]);

        assert_eq!(job.variables.len(), 5);
        assert_eq!(job.variables[0].filter_references(), vec!["site".to_string()]);
        match &job.variables[2].kind {
            VariableKind::Choice { choices } => {
                assert_eq!(choices[0], Choice::new("fast", "fast"));
                assert_eq!(choices[1], Choice::new("safe", "Safe mode"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(job.variables[2].default, Some(serde_json::json!("safe")));
        assert!(!job.variables[3].required);
        assert!(!job.variables[4].required);

        assert!(job.hooks.before_start);
        assert!(job.hooks.on_failure);
        assert!(!job.hooks.on_success);
    }

    #[test]
    fn test_missing_run_function() {
        let err = parse(r#"jobs.register { name = "Broken" }"#).unwrap_err();
        assert!(err.to_string().contains("'run' function"));
    }

    #[test]
    fn test_unknown_variable_type() {
        let err = parse(
            r#"
            jobs.register {
                name = "Broken",
                variables = { { name = "x", type = "colour" } },
                run = function() end,
            }
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown type 'colour'"));
    }

    #[test]
    fn test_class_name_derivation() {
        assert_eq!(class_name_for("backup configs").as_deref(), Some("BackupConfigs"));
        assert_eq!(class_name_for("VLAN-audit v2").as_deref(), Some("VLANAuditV2"));
        assert_eq!(class_name_for("!!!"), None);
    }
}
