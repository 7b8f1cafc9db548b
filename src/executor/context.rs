use std::sync::Arc;

use tokio::sync::Mutex;

use super::result::{ActionError, ActionRecord, ActionResult, ErrorKind, Trace};
use crate::event::Environment;
use crate::expression::VariableScope;
use crate::state::ScopeContext;
use crate::value::{is_reserved_key, Value, ValueMap};

/// Names resolved from the environment rather than from bindings. They are
/// always defined (null when absent) and cannot be rebound.
pub const ROOTS: [&str; 11] = [
    "args",
    "user",
    "member",
    "guild",
    "channel",
    "message",
    "attachments",
    "state",
    "error",
    "automod",
    "event",
];

pub fn is_root(name: &str) -> bool {
    ROOTS.contains(&name)
}

/// Local variables of one invocation. This is the only namespace actions
/// write to directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(ValueMap);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: &str, value: Value) -> Result<(), ActionError> {
        if is_reserved_key(name) {
            return Err(ActionError::new(
                ErrorKind::SecurityRejection,
                format!("reserved key `{}` cannot be bound", name),
            ));
        }
        if is_root(name) {
            return Err(ActionError::runtime(format!(
                "`{}` is a built-in name and cannot be rebound",
                name
            )));
        }
        self.0.insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn as_map(&self) -> &ValueMap {
        &self.0
    }
}

/// Everything an action list can see while it runs.
///
/// One context exists per top-level invocation. `parallel` branches and
/// `call_flow` get forks that share the environment and the trace.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub environment: Arc<Environment>,
    env_values: Arc<ValueMap>,
    pub event_data: Value,
    pub args: ValueMap,
    pub bindings: Bindings,
    /// `{scope: {name: value}}` for declared variables.
    pub state_view: ValueMap,
    pub error: Option<Value>,
    pub automod: Option<Value>,
    pub trace: Trace,
    pub try_depth: usize,
    pub call_depth: usize,
}

impl ActionContext {
    pub fn new(environment: Environment) -> Self {
        let env_values = environment.to_values();
        Self {
            environment: Arc::new(environment),
            env_values: Arc::new(env_values),
            event_data: Value::Null,
            args: ValueMap::new(),
            bindings: Bindings::new(),
            state_view: ValueMap::new(),
            error: None,
            automod: None,
            trace: Arc::new(Mutex::new(Vec::new())),
            try_depth: 0,
            call_depth: 0,
        }
    }

    pub fn with_args(mut self, args: ValueMap) -> Self {
        self.args = args;
        self
    }

    pub fn with_event_data(mut self, data: Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn scope_context(&self) -> ScopeContext {
        self.environment.scope_context()
    }

    /// Copy for a concurrent branch. Bindings written by the branch are not
    /// visible to its siblings or the parent.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Context for a called flow: same environment, state view and trace,
    /// fresh bindings and the given arguments.
    pub fn child(&self, args: ValueMap) -> Self {
        Self {
            environment: self.environment.clone(),
            env_values: self.env_values.clone(),
            event_data: self.event_data.clone(),
            args,
            bindings: Bindings::new(),
            state_view: self.state_view.clone(),
            error: None,
            automod: self.automod.clone(),
            trace: self.trace.clone(),
            try_depth: self.try_depth,
            call_depth: self.call_depth + 1,
        }
    }

    pub fn update_state_view(&mut self, scope: &str, name: &str, value: Value) {
        if let Value::Map(entries) = self
            .state_view
            .entry(scope.to_string())
            .or_insert_with(|| Value::Map(ValueMap::new()))
        {
            entries.insert(name.to_string(), value);
        }
    }

    pub async fn record(&self, action: &str, result: ActionResult) {
        self.trace.lock().await.push(ActionRecord {
            action: action.to_string(),
            result,
        });
    }

    pub async fn records(&self) -> Vec<ActionRecord> {
        self.trace.lock().await.clone()
    }
}

impl VariableScope for ActionContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "args" => Some(Value::Map(self.args.clone())),
            "state" => Some(Value::Map(self.state_view.clone())),
            "error" => Some(self.error.clone().unwrap_or_default()),
            "automod" => Some(self.automod.clone().unwrap_or_default()),
            "event" => Some(self.event_data.clone()),
            "attachments" => Some(
                self.env_values
                    .get("message")
                    .and_then(|m| m.get_key("attachments"))
                    .cloned()
                    .unwrap_or(Value::List(Vec::new())),
            ),
            root if is_root(root) => Some(self.env_values.get(root).cloned().unwrap_or_default()),
            _ => self.bindings.get(name).cloned(),
        }
    }
}
