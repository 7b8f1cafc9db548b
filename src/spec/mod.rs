//! Bot specification documents.
//!
//! A [`Specification`] is the merged, immutable description of a bot:
//! commands, event handlers, reusable flows, the state schema, moderation
//! rules and outbound pipes. It is validated once and then shared behind an
//! `Arc`; reloading replaces it wholesale.

pub mod action;
pub mod automod;
pub mod schema;

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::duration;
use crate::expression::pattern::validate_pattern;
use crate::value::{is_reserved_key, Value};

pub use action::{Action, ActionKind};
pub use automod::{AutomodRule, AutomodSpec, Trigger};
pub use schema::{ColumnDef, ColumnType, StateSchema, TableDef, VariableDef};

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Failed to read specification: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse specification: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("Flow `{flow}` referenced from {location} is not defined")]
    UnknownFlow { flow: String, location: String },
    #[error("Pipe `{pipe}` referenced from {location} is not defined")]
    UnknownPipe { pipe: String, location: String },
    #[error("Reserved name `{name}` used for {kind}")]
    ReservedName { kind: &'static str, name: String },
    #[error("Table `{table}`: {message}")]
    InvalidTable { table: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    #[serde(default)]
    pub events: Vec<EventHandlerDef>,
    #[serde(default)]
    pub flows: Vec<FlowDef>,
    #[serde(default)]
    pub state: StateSchema,
    #[serde(default)]
    pub automod: AutomodSpec,
    #[serde(default)]
    pub pipes: BTreeMap<String, PipeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionDef>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDef {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandlerDef {
    /// Built-in event kind (`message_create`, ...) or a custom event name.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Expression evaluated in the flow's final context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    /// Parameters without a default are required unless stated otherwise.
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipeKind {
    #[default]
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeDef {
    #[serde(rename = "type", default)]
    pub kind: PipeKind,
    pub base_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(
        default,
        with = "duration::flexible_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl Specification {
    pub fn from_json_str(source: &str) -> Result<Self, SpecError> {
        let spec: Specification = serde_json::from_str(source)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SpecError> {
        let reader = BufReader::new(File::open(path)?);
        let spec: Specification = serde_json::from_reader(reader)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn command(&self, name: &str) -> Option<&CommandDef> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn flow(&self, name: &str) -> Option<&FlowDef> {
        self.flows.iter().find(|f| f.name == name)
    }

    pub fn handlers_for<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a EventHandlerDef> {
        self.events.iter().filter(move |h| h.event == event)
    }

    /// Structural checks that do not need a running bot: unique names,
    /// resolvable flow and pipe references, and no reserved identifiers.
    pub fn validate(&self) -> Result<(), SpecError> {
        unique("command", self.commands.iter().map(|c| c.name.as_str()))?;
        unique("flow", self.flows.iter().map(|f| f.name.as_str()))?;
        unique("automod rule", self.automod.rules.iter().map(|r| r.name.as_str()))?;

        for name in self.state.variables.keys() {
            reject_reserved("state variable", name)?;
        }
        for (table, def) in &self.state.tables {
            reject_reserved("table", table)?;
            for column in def.columns.keys() {
                reject_reserved("column", column)?;
            }
            if def.columns.values().filter(|c| c.primary).count() > 1 {
                return Err(SpecError::InvalidTable {
                    table: table.clone(),
                    message: "more than one primary column".to_string(),
                });
            }
        }

        for command in &self.commands {
            for option in &command.options {
                reject_reserved("command option", &option.name)?;
            }
            self.check_actions(&command.actions, &format!("command `{}`", command.name))?;
        }
        for handler in &self.events {
            self.check_actions(&handler.actions, &format!("event `{}`", handler.event))?;
        }
        for flow in &self.flows {
            for param in &flow.params {
                reject_reserved("flow parameter", &param.name)?;
            }
            self.check_actions(&flow.actions, &format!("flow `{}`", flow.name))?;
        }
        for rule in &self.automod.rules {
            self.check_actions(&rule.actions, &format!("automod rule `{}`", rule.name))?;
            for trigger in rule.triggers.as_slice() {
                if let Trigger::Regex { patterns } = trigger {
                    for pattern in patterns.as_slice() {
                        if let Err(e) = validate_pattern(pattern) {
                            tracing::warn!(rule = %rule.name, pattern = %pattern, "Automod pattern will be skipped: {}", e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_actions(&self, actions: &[Action], location: &str) -> Result<(), SpecError> {
        for action in actions {
            match &action.kind {
                ActionKind::CallFlow { flow, .. } if self.flow(flow).is_none() => {
                    return Err(SpecError::UnknownFlow {
                        flow: flow.clone(),
                        location: location.to_string(),
                    });
                }
                ActionKind::PipeRequest { pipe, .. } if !self.pipes.contains_key(pipe) => {
                    return Err(SpecError::UnknownPipe {
                        pipe: pipe.clone(),
                        location: location.to_string(),
                    });
                }
                _ => {}
            }
            if let Some(bind) = &action.bind {
                reject_reserved("binding", bind)?;
            }
            for nested in action.children() {
                self.check_actions(nested, location)?;
            }
        }
        Ok(())
    }
}

fn unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<(), SpecError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SpecError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn reject_reserved(kind: &'static str, name: &str) -> Result<(), SpecError> {
    if is_reserved_key(name) {
        return Err(SpecError::ReservedName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateScope;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "commands": [{"name": "check", "options": [{"name": "value", "required": true}],
                      "actions": [{"action": "flow_if", "if": "args.value > 10",
                                   "then": [{"action": "reply", "content": "gt10"}]}]}],
        "events": [{"event": "message_create", "actions": []}],
        "flows": [{"name": "calculate", "params": [{"name": "a"}, {"name": "b"}],
                   "returns": "args.a + args.b", "actions": []}],
        "state": {"variables": {"counter": {"scope": "guild", "default": 0, "ttl": "5s"}},
                  "tables": {"warnings": {"columns": {"user_id": {"type": "string"}}}}},
        "automod": {"rules": [{"name": "spam", "triggers": [{"type": "spam"}], "actions": []}]},
        "pipes": {"hooks": {"type": "http", "base_url": "https://example.test"}}
    }"#;

    #[test]
    fn test_parse_sample() {
        let spec = Specification::from_json_str(SAMPLE).unwrap();
        assert_eq!(spec.commands[0].name, "check");
        assert!(spec.commands[0].options[0].required);
        assert_eq!(spec.flow("calculate").unwrap().params.len(), 2);
        assert!(spec.flow("calculate").unwrap().params[0].is_required());
        assert_eq!(spec.state.variables["counter"].scope, StateScope::Guild);
        assert_eq!(spec.handlers_for("message_create").count(), 1);
        assert_eq!(spec.pipes["hooks"].kind, PipeKind::Http);
    }

    #[test]
    fn test_unknown_flow_reference() {
        let source = r#"{"commands": [{"name": "x", "actions": [
            {"action": "try", "do": [{"action": "call_flow", "flow": "missing"}]}
        ]}]}"#;
        let err = Specification::from_json_str(source).unwrap_err();
        assert!(matches!(err, SpecError::UnknownFlow { ref flow, .. } if flow == "missing"));
    }

    #[test]
    fn test_duplicates_and_reserved_names() {
        let dup = r#"{"flows": [{"name": "a"}, {"name": "a"}]}"#;
        assert!(matches!(
            Specification::from_json_str(dup),
            Err(SpecError::Duplicate { kind: "flow", .. })
        ));
        let reserved = r#"{"state": {"variables": {"__proto__": {}}}}"#;
        assert!(matches!(
            Specification::from_json_str(reserved),
            Err(SpecError::ReservedName { .. })
        ));
        let binding = r#"{"commands": [{"name": "x", "actions": [
            {"action": "log", "message": "hi", "as": "constructor"}
        ]}]}"#;
        assert!(Specification::from_json_str(binding).is_err());
    }

    #[test]
    fn test_unknown_action_kind_fails_to_parse() {
        let source = r#"{"commands": [{"name": "x", "actions": [{"action": "eval", "code": "1"}]}]}"#;
        assert!(matches!(
            Specification::from_json_str(source),
            Err(SpecError::Parse(_))
        ));
    }
}
