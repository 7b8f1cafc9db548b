//! Action execution.
//!
//! [`ActionExecutor`] walks action lists, evaluating guards and templates
//! against an [`ActionContext`], and threads a [`ControlFlow`] through the
//! nested flow-control actions. Every executed action leaves an
//! [`ActionRecord`] in the invocation's trace.

pub mod context;
pub mod data;
mod leaf;
pub mod result;
pub mod timer;

use std::sync::Arc;

use async_recursion::async_recursion;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::event::{Environment, EventBus};
use crate::expression::ExpressionEvaluator;
use crate::pipe::PipeRegistry;
use crate::platform::PlatformClient;
use crate::spec::{Action, ActionKind, Specification};
use crate::state::StateManager;
use crate::value::{Value, ValueMap};

pub use context::{ActionContext, Bindings};
pub use result::{
    ActionError, ActionRecord, ActionResult, ControlFlow, ErrorKind, ExecutionReport, FlowError,
    TimerError,
};
pub use timer::TimerRegistry;

pub struct ActionExecutor {
    spec: Arc<Specification>,
    evaluator: Arc<ExpressionEvaluator>,
    state: Arc<StateManager>,
    platform: Arc<dyn PlatformClient>,
    pipes: PipeRegistry,
    events: Arc<EventBus>,
    timers: TimerRegistry,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(
        spec: Arc<Specification>,
        state: Arc<StateManager>,
        platform: Arc<dyn PlatformClient>,
        events: Arc<EventBus>,
        config: ExecutorConfig,
    ) -> Self {
        let pipes = PipeRegistry::from_defs(&spec.pipes);
        Self {
            evaluator: Arc::new(ExpressionEvaluator::with_cache_capacity(
                config.parse_cache_capacity,
            )),
            timers: TimerRegistry::new(events.clone()),
            spec,
            state,
            platform,
            pipes,
            events,
            config,
        }
    }

    /// Replaces the pipes built from the specification's declarations.
    pub fn with_pipes(mut self, pipes: PipeRegistry) -> Self {
        self.pipes = pipes;
        self
    }

    pub fn spec(&self) -> &Arc<Specification> {
        &self.spec
    }

    pub fn evaluator(&self) -> &Arc<ExpressionEvaluator> {
        &self.evaluator
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// A context for one invocation with the state view loaded.
    pub async fn new_context(
        &self,
        environment: Environment,
        args: ValueMap,
        event_data: Value,
    ) -> ActionContext {
        let mut ctx = ActionContext::new(environment)
            .with_args(args)
            .with_event_data(event_data);
        self.refresh_state_view(&mut ctx).await;
        ctx
    }

    #[tracing::instrument(level = "debug", skip_all, fields(actions = actions.len()))]
    pub async fn execute(&self, actions: &[Action], ctx: &mut ActionContext) -> ExecutionReport {
        let flow = self.run_list(actions, ctx).await;
        debug!("Action list finished with {:?}", flow);
        ExecutionReport::from_flow(ctx.records().await, flow)
    }

    /// Runs actions in order until one of them ends the list.
    pub async fn run_list(&self, actions: &[Action], ctx: &mut ActionContext) -> ControlFlow {
        for action in actions {
            match self.run_action(action, ctx).await {
                ControlFlow::Next => {}
                flow => return flow,
            }
        }
        ControlFlow::Next
    }

    #[async_recursion]
    pub async fn run_action(&self, action: &Action, ctx: &mut ActionContext) -> ControlFlow {
        if let Some(guard) = &action.when {
            let passed = self.condition(guard, ctx);
            match passed {
                Ok(true) => {}
                Ok(false) => {
                    ctx.record(action.name(), ActionResult::skipped()).await;
                    return ControlFlow::Next;
                }
                Err(error) => return self.fail(action, ctx, error).await,
            }
        }

        match &action.kind {
            ActionKind::Throw { message } => {
                let error = match self.interpolate(message, ctx) {
                    Ok(message) => ActionError::new(ErrorKind::Thrown, message),
                    Err(error) => error,
                };
                ctx.record(action.name(), ActionResult::failed(error.clone()))
                    .await;
                ControlFlow::Fail(error)
            }
            kind if is_flow_control(kind) => match self.run_flow_control(action, ctx).await {
                // already recorded where it happened
                Ok((ControlFlow::Fail(error), _)) => ControlFlow::Fail(error),
                Ok((flow, data)) => {
                    ctx.record(action.name(), ActionResult::ok(data)).await;
                    flow
                }
                Err(error) => self.fail(action, ctx, error).await,
            },
            _ => {
                let outcome = self.run_leaf(action, ctx).await;
                let bound = outcome.and_then(|data| match &action.bind {
                    Some(name) => ctx.bindings.insert(name, data.clone()).map(|_| data),
                    None => Ok(data),
                });
                match bound {
                    Ok(data) => {
                        ctx.record(action.name(), ActionResult::ok(data)).await;
                        ControlFlow::Next
                    }
                    Err(error) => self.fail(action, ctx, error).await,
                }
            }
        }
    }

    /// Records a failure and decides whether it ends the enclosing list.
    async fn fail(&self, action: &Action, ctx: &ActionContext, error: ActionError) -> ControlFlow {
        warn!(action = action.name(), "Action failed: {}", error);
        ctx.record(action.name(), ActionResult::failed(error.clone()))
            .await;
        if action.fatal || ctx.try_depth > 0 {
            ControlFlow::Fail(error)
        } else {
            ControlFlow::Next
        }
    }

    async fn run_flow_control(
        &self,
        action: &Action,
        ctx: &mut ActionContext,
    ) -> Result<(ControlFlow, Value), ActionError> {
        let flow = match &action.kind {
            ActionKind::FlowIf {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.condition(condition, ctx)? {
                    then
                } else {
                    otherwise
                };
                self.run_list(branch, ctx).await
            }
            ActionKind::FlowSwitch {
                value,
                cases,
                default,
            } => {
                let key = self.expression(value, ctx)?.to_string();
                let branch = cases.get(&key).unwrap_or(default);
                self.run_list(branch, ctx).await
            }
            ActionKind::FlowWhile {
                condition,
                body,
                max_iterations,
            } => {
                let cap = max_iterations.unwrap_or(self.config.max_while_iterations);
                self.run_while(condition, body, cap, ctx).await?
            }
            ActionKind::Repeat { times, body } => {
                let var = action.bind.as_deref().unwrap_or("index");
                self.run_repeat(times, body, var, ctx).await?
            }
            ActionKind::Batch { items, each } => {
                let var = action.bind.as_deref().unwrap_or("item");
                self.run_batch(items, each, var, ctx).await?
            }
            ActionKind::Parallel { actions } => self.run_parallel(actions, ctx).await,
            ActionKind::CallFlow { flow, args } => {
                return self.call_flow(action, flow, args, ctx).await;
            }
            ActionKind::Try {
                body,
                catch,
                finally,
            } => self.run_try(body, catch, finally, ctx).await,
            ActionKind::Abort { reason } => {
                let reason = match reason {
                    Some(reason) => Some(self.interpolate(reason, ctx)?),
                    None => None,
                };
                ControlFlow::Abort { reason }
            }
            ActionKind::Return { value } => {
                let value = match value {
                    Some(value) => self.resolve(value, ctx)?,
                    None => Value::Null,
                };
                ControlFlow::Return(value)
            }
            other => {
                return Err(ActionError::runtime(format!(
                    "`{}` is not a flow-control action",
                    other.as_ref()
                )))
            }
        };
        Ok((flow, Value::Null))
    }

    async fn run_while(
        &self,
        condition: &str,
        body: &[Action],
        cap: u64,
        ctx: &mut ActionContext,
    ) -> Result<ControlFlow, ActionError> {
        let mut iterations = 0;
        while self.condition(condition, ctx)? {
            if iterations >= cap {
                warn!(condition, cap, "flow_while stopped at its iteration cap");
                break;
            }
            iterations += 1;
            match self.run_list(body, ctx).await {
                ControlFlow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::Next)
    }

    async fn run_repeat(
        &self,
        times: &Value,
        body: &[Action],
        var: &str,
        ctx: &mut ActionContext,
    ) -> Result<ControlFlow, ActionError> {
        let times = self.resolve(times, ctx)?;
        let requested = times.as_i64().ok_or_else(|| {
            ActionError::new(
                ErrorKind::Evaluation,
                format!("repeat count must be a number, got {}", times.type_name()),
            )
        })?;
        let max = i64::try_from(self.config.max_repeat).unwrap_or(i64::MAX);
        if requested > max {
            warn!(requested, max, "repeat count clamped");
        }
        for index in 0..requested.clamp(0, max) {
            ctx.bindings.insert(var, Value::Integer(index))?;
            match self.run_list(body, ctx).await {
                ControlFlow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::Next)
    }

    async fn run_batch(
        &self,
        items: &Value,
        each: &[Action],
        var: &str,
        ctx: &mut ActionContext,
    ) -> Result<ControlFlow, ActionError> {
        let items = match self.resolve(items, ctx)? {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(ActionError::new(
                    ErrorKind::Evaluation,
                    format!("batch items must be a list, got {}", other.type_name()),
                ))
            }
        };
        for (index, item) in items.into_iter().enumerate() {
            ctx.bindings.insert(var, item)?;
            if var != "index" {
                ctx.bindings.insert("index", Value::Integer(index as i64))?;
            }
            match self.run_list(each, ctx).await {
                ControlFlow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::Next)
    }

    /// Every branch runs to completion on its own fork. Bindings made by a
    /// branch are dropped; state writes are picked up by reloading the view.
    async fn run_parallel(&self, actions: &[Action], ctx: &mut ActionContext) -> ControlFlow {
        let branches = actions.iter().map(|action| {
            let mut fork = ctx.fork();
            async move { self.run_action(action, &mut fork).await }
        });
        let flows = join_all(branches).await;
        self.refresh_state_view(ctx).await;
        merge_branches(flows)
    }

    async fn call_flow(
        &self,
        action: &Action,
        name: &str,
        args: &ValueMap,
        ctx: &mut ActionContext,
    ) -> Result<(ControlFlow, Value), ActionError> {
        if ctx.call_depth >= self.config.max_call_depth {
            return Err(FlowError::CallDepthExceeded(self.config.max_call_depth).into());
        }
        let flow = self
            .spec
            .flow(name)
            .ok_or_else(|| FlowError::FlowNotFound(name.to_string()))?;

        let mut resolved = ValueMap::new();
        for (key, value) in args {
            resolved.insert(key.clone(), self.resolve(value, ctx)?);
        }
        for param in &flow.params {
            if resolved.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    resolved.insert(param.name.clone(), default.clone());
                }
                None if param.is_required() => {
                    return Err(FlowError::MissingParameter {
                        flow: flow.name.clone(),
                        param: param.name.clone(),
                    }
                    .into())
                }
                None => {}
            }
        }

        debug!(flow = %flow.name, depth = ctx.call_depth + 1, "Calling flow");
        let mut child = ctx.child(resolved);
        let outcome = self.run_list(&flow.actions, &mut child).await;
        ctx.state_view = child.state_view.clone();

        let value = match outcome {
            ControlFlow::Next => match &flow.returns {
                Some(returns) => self.expression(returns, &child)?,
                None => Value::Null,
            },
            ControlFlow::Return(value) => value,
            flow => return Ok((flow, Value::Null)),
        };
        if let Some(bind) = &action.bind {
            ctx.bindings.insert(bind, value.clone())?;
        }
        Ok((ControlFlow::Next, value))
    }

    async fn run_try(
        &self,
        body: &[Action],
        catch: &[Action],
        finally: &[Action],
        ctx: &mut ActionContext,
    ) -> ControlFlow {
        ctx.try_depth += 1;
        let mut flow = self.run_list(body, ctx).await;
        ctx.try_depth -= 1;

        if let ControlFlow::Fail(error) = &flow {
            debug!("Caught {}", error);
            let previous = ctx.error.replace(error.to_value());
            flow = self.run_list(catch, ctx).await;
            ctx.error = previous;
        }

        match self.run_list(finally, ctx).await {
            ControlFlow::Next => flow,
            overriding => overriding,
        }
    }

    async fn refresh_state_view(&self, ctx: &mut ActionContext) {
        match self.state.snapshot(&ctx.scope_context()).await {
            Ok(view) => ctx.state_view = view,
            Err(e) => warn!("Failed to load state view: {}", e),
        }
    }

    // expression helpers

    fn condition(&self, source: &str, ctx: &ActionContext) -> Result<bool, ActionError> {
        Ok(self.evaluator.condition(source, ctx)?)
    }

    /// A bare expression, or a template when it contains `${`.
    fn expression(&self, source: &str, ctx: &ActionContext) -> Result<Value, ActionError> {
        if source.contains("${") {
            Ok(self.evaluator.resolve(source, ctx)?)
        } else {
            Ok(self.evaluator.evaluate(source, ctx)?)
        }
    }

    fn interpolate(&self, template: &str, ctx: &ActionContext) -> Result<String, ActionError> {
        Ok(self.evaluator.interpolate(template, ctx)?)
    }

    fn resolve(&self, value: &Value, ctx: &ActionContext) -> Result<Value, ActionError> {
        Ok(self.evaluator.resolve_value(value, ctx)?)
    }
}

fn is_flow_control(kind: &ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::FlowIf { .. }
            | ActionKind::FlowSwitch { .. }
            | ActionKind::FlowWhile { .. }
            | ActionKind::Repeat { .. }
            | ActionKind::Batch { .. }
            | ActionKind::Parallel { .. }
            | ActionKind::CallFlow { .. }
            | ActionKind::Try { .. }
            | ActionKind::Abort { .. }
            | ActionKind::Return { .. }
    )
}

fn severity(flow: &ControlFlow) -> u8 {
    match flow {
        ControlFlow::Next => 0,
        ControlFlow::Return(_) => 1,
        ControlFlow::Fail(_) => 2,
        ControlFlow::Abort { .. } => 3,
    }
}

/// Abort wins over failure, failure over return.
fn merge_branches(flows: Vec<ControlFlow>) -> ControlFlow {
    flows
        .into_iter()
        .fold(ControlFlow::Next, |merged, flow| {
            if severity(&flow) > severity(&merged) {
                flow
            } else {
                merged
            }
        })
}

#[cfg(test)]
mod tests;
