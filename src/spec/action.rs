//! Declarative actions.
//!
//! An action is a JSON object tagged by its `action` field. Every action may
//! carry `as` (binding name for its result), `fatal` and a `when` guard. For
//! `repeat` and `batch`, `as` names the loop variable instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::value::{Value, ValueMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            bind: None,
            fatal: false,
            when: None,
        }
    }

    pub fn name(&self) -> &str {
        self.kind.as_ref()
    }

    /// Nested action lists, in declaration order.
    pub fn children(&self) -> Vec<&[Action]> {
        match &self.kind {
            ActionKind::FlowIf {
                then, otherwise, ..
            } => vec![then, otherwise],
            ActionKind::FlowSwitch { cases, default, .. } => cases
                .values()
                .map(Vec::as_slice)
                .chain(std::iter::once(default.as_slice()))
                .collect(),
            ActionKind::FlowWhile { body, .. } | ActionKind::Repeat { body, .. } => vec![body],
            ActionKind::Batch { each, .. } => vec![each],
            ActionKind::Parallel { actions } => vec![actions],
            ActionKind::Try {
                body,
                catch,
                finally,
            } => vec![body, catch, finally],
            _ => Vec::new(),
        }
    }
}

fn one() -> Value {
    Value::Integer(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VoiceOperation {
    Join,
    Leave,
    Play,
    Stop,
    Pause,
    Resume,
    Skip,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "action", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    // flow control
    FlowIf {
        #[serde(rename = "if")]
        condition: String,
        #[serde(default)]
        then: Vec<Action>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Action>,
    },
    FlowSwitch {
        value: String,
        #[serde(default)]
        cases: BTreeMap<String, Vec<Action>>,
        #[serde(default)]
        default: Vec<Action>,
    },
    FlowWhile {
        #[serde(rename = "while")]
        condition: String,
        #[serde(rename = "do")]
        body: Vec<Action>,
        #[serde(default)]
        max_iterations: Option<u64>,
    },
    Repeat {
        times: Value,
        #[serde(rename = "do")]
        body: Vec<Action>,
    },
    Batch {
        items: Value,
        each: Vec<Action>,
    },
    Parallel {
        actions: Vec<Action>,
    },
    CallFlow {
        flow: String,
        #[serde(default)]
        args: ValueMap,
    },
    Try {
        #[serde(rename = "do")]
        body: Vec<Action>,
        #[serde(default)]
        catch: Vec<Action>,
        #[serde(default)]
        finally: Vec<Action>,
    },
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
    Return {
        #[serde(default)]
        value: Option<Value>,
    },
    Throw {
        message: String,
    },

    // data
    Set {
        var: String,
        value: Value,
    },
    Increment {
        var: String,
        #[serde(default = "one")]
        by: Value,
    },
    Decrement {
        var: String,
        #[serde(default = "one")]
        by: Value,
    },
    ListPush {
        var: String,
        value: Value,
    },
    ListRemove {
        var: String,
        #[serde(default)]
        index: Option<Value>,
        #[serde(default)]
        value: Option<Value>,
    },
    SetMap {
        var: String,
        key: String,
        value: Value,
    },
    DeleteMap {
        var: String,
        key: String,
    },

    // platform
    SendMessage {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        embeds: Option<Value>,
        #[serde(default)]
        components: Option<Value>,
    },
    Reply {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        embeds: Option<Value>,
        #[serde(default)]
        components: Option<Value>,
        #[serde(default)]
        ephemeral: bool,
    },
    EditMessage {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        embeds: Option<Value>,
    },
    DeleteMessage {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    AssignRole {
        #[serde(default)]
        user: Option<String>,
        role: String,
    },
    RemoveRole {
        #[serde(default)]
        user: Option<String>,
        role: String,
    },
    SetNickname {
        #[serde(default)]
        user: Option<String>,
        nickname: String,
    },
    Voice {
        operation: VoiceOperation,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        volume: Option<Value>,
    },

    // tables
    DbInsert {
        table: String,
        #[serde(default)]
        row: ValueMap,
    },
    DbUpdate {
        table: String,
        #[serde(default, rename = "where")]
        filter: ValueMap,
        set: ValueMap,
    },
    DbDelete {
        table: String,
        #[serde(default, rename = "where")]
        filter: ValueMap,
    },
    DbQuery {
        table: String,
        #[serde(default, rename = "where")]
        filter: ValueMap,
        #[serde(default)]
        order_by: Option<String>,
        #[serde(default)]
        descending: bool,
        #[serde(default)]
        limit: Option<Value>,
        #[serde(default)]
        offset: Option<Value>,
    },

    // timers and events
    CreateTimer {
        #[serde(default)]
        id: Option<String>,
        delay: Value,
        event: String,
        #[serde(default)]
        data: Value,
    },
    CancelTimer {
        id: String,
    },
    Emit {
        event: String,
        #[serde(default)]
        data: Value,
    },
    PipeRequest {
        pipe: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
    Wait {
        duration: Value,
    },
}
