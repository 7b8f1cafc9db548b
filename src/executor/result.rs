use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::event::EventError;
use crate::expression::EvalError;
use crate::pipe::PipeError;
use crate::platform::PlatformError;
use crate::state::StateError;
use crate::value::{Value, ValueMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Evaluation,
    InvalidScopeContext,
    UnknownTable,
    UnknownVariable,
    SecurityRejection,
    RuntimeAction,
    TimerNotFound,
    FlowNotFound,
    Thrown,
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeAction, message)
    }

    /// The value bound as `error` inside a `catch` block.
    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        map.insert("kind".to_string(), Value::from(self.kind.as_ref()));
        map.insert("message".to_string(), Value::from(self.message.as_str()));
        Value::Map(map)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),
    #[error("Flow `{flow}` is missing required parameter `{param}`")]
    MissingParameter { flow: String, param: String },
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimerError {
    #[error("Timer not found: {0}")]
    TimerNotFound(String),
    #[error("Invalid timer delay: {0}")]
    InvalidDelay(String),
}

impl From<EvalError> for ActionError {
    fn from(error: EvalError) -> Self {
        Self::new(ErrorKind::Evaluation, error.to_string())
    }
}

impl From<StateError> for ActionError {
    fn from(error: StateError) -> Self {
        let kind = match &error {
            StateError::InvalidScopeContext { .. } => ErrorKind::InvalidScopeContext,
            StateError::UnknownVariable(_) => ErrorKind::UnknownVariable,
            StateError::UnknownTable(_) => ErrorKind::UnknownTable,
            StateError::SecurityRejection(_) => ErrorKind::SecurityRejection,
            _ => ErrorKind::RuntimeAction,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<FlowError> for ActionError {
    fn from(error: FlowError) -> Self {
        let kind = match &error {
            FlowError::FlowNotFound(_) => ErrorKind::FlowNotFound,
            _ => ErrorKind::RuntimeAction,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<TimerError> for ActionError {
    fn from(error: TimerError) -> Self {
        let kind = match &error {
            TimerError::TimerNotFound(_) => ErrorKind::TimerNotFound,
            TimerError::InvalidDelay(_) => ErrorKind::Evaluation,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<PlatformError> for ActionError {
    fn from(error: PlatformError) -> Self {
        Self::runtime(error.to_string())
    }
}

impl From<PipeError> for ActionError {
    fn from(error: PipeError) -> Self {
        Self::runtime(error.to_string())
    }
}

impl From<EventError> for ActionError {
    fn from(error: EventError) -> Self {
        Self::runtime(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    /// Set when a `when` guard was false.
    #[serde(default)]
    pub skipped: bool,
}

impl ActionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::ok(Value::Null)
        }
    }

    pub fn failed(error: ActionError) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
            skipped: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub result: ActionResult,
}

/// Per-invocation trace shared by forked contexts.
pub type Trace = Arc<Mutex<Vec<ActionRecord>>>;

/// How a list of actions ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Next,
    Abort { reason: Option<String> },
    Return(Value),
    Fail(ActionError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub records: Vec<ActionRecord>,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ExecutionReport {
    pub fn from_flow(records: Vec<ActionRecord>, flow: ControlFlow) -> Self {
        let mut report = Self {
            records,
            ..Default::default()
        };
        match flow {
            ControlFlow::Next => {}
            ControlFlow::Abort { reason } => {
                report.aborted = true;
                report.abort_reason = reason;
            }
            ControlFlow::Return(value) => report.returned = Some(value),
            ControlFlow::Fail(error) => report.error = Some(error),
        }
        report
    }

    /// Number of executed (not skipped) actions of the given kind.
    pub fn count(&self, action: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.action == action && !r.result.skipped)
            .count()
    }

    pub fn errors(&self) -> Vec<&ActionError> {
        self.records
            .iter()
            .filter_map(|r| r.result.error.as_ref())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Appends another report's records, keeping the first error or abort.
    pub fn merge(&mut self, other: ExecutionReport) {
        self.records.extend(other.records);
        if !self.aborted && other.aborted {
            self.aborted = true;
            self.abort_reason = other.abort_reason;
        }
        if self.error.is_none() {
            self.error = other.error;
        }
        if self.returned.is_none() {
            self.returned = other.returned;
        }
    }
}
