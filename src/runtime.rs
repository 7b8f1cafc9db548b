//! The bot runtime.
//!
//! [`Runtime`] owns every collaborator built from one [`Specification`]:
//! the state manager, the event bus, the action executor and the automod
//! engine. Platform adapters feed it commands and events; custom and timer
//! events raised by actions come back in through the event loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::automod::{AutomodEngine, AutomodOutcome};
use crate::config::RuntimeConfig;
use crate::event::{Environment, EventBus, EventError, EventKind, InboundEvent};
use crate::executor::{ActionExecutor, ExecutionReport};
use crate::platform::PlatformClient;
use crate::spec::Specification;
use crate::state::{InMemoryStorage, StateManager, StorageAdapter};
use crate::value::{Value, ValueMap};
use crate::{Error, RuntimeResult};

/// What happened while handling one inbound event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    /// Present when the event carried a message and automod ran.
    pub automod: Option<AutomodOutcome>,
    /// Actions of the matched automod rules.
    pub moderation: Option<ExecutionReport>,
    /// One report per handler whose guard passed.
    pub handlers: Vec<ExecutionReport>,
}

impl EventOutcome {
    /// True when at least one automod rule matched the message.
    pub fn was_moderated(&self) -> bool {
        self.automod.as_ref().is_some_and(|outcome| !outcome.passed)
    }
}

pub struct Runtime {
    spec: Arc<Specification>,
    executor: Arc<ActionExecutor>,
    automod: AutomodEngine,
    events: Arc<EventBus>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Runtime {
    /// Validates `spec` and wires the runtime around `storage` and `platform`.
    ///
    /// Declared tables are created in the storage before this returns.
    pub async fn new(
        spec: Specification,
        config: RuntimeConfig,
        storage: Arc<dyn StorageAdapter>,
        platform: Arc<dyn PlatformClient>,
    ) -> RuntimeResult<Self> {
        spec.validate()?;
        let spec = Arc::new(spec);

        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let state = Arc::new(StateManager::new(storage, &spec.state, config.state.clone()));
        for (name, def) in &spec.state.tables {
            state.register_table(name, def.clone()).await?;
        }

        let executor = Arc::new(ActionExecutor::new(
            spec.clone(),
            state,
            platform,
            events.clone(),
            config.executor.clone(),
        ));
        let automod = AutomodEngine::new(
            &spec.automod,
            executor.evaluator().clone(),
            config.automod.clone(),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            name = spec.name.as_deref().unwrap_or("unnamed"),
            commands = spec.commands.len(),
            handlers = spec.events.len(),
            flows = spec.flows.len(),
            "Runtime created"
        );
        Ok(Self {
            spec,
            executor,
            automod,
            events,
            shutdown_tx,
        })
    }

    /// A runtime over in-memory storage with the default configuration.
    pub async fn in_memory(spec: Specification, platform: Arc<dyn PlatformClient>) -> RuntimeResult<Self> {
        Self::new(
            spec,
            RuntimeConfig::default(),
            Arc::new(InMemoryStorage::new()),
            platform,
        )
        .await
    }

    pub fn spec(&self) -> &Arc<Specification> {
        &self.spec
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn state(&self) -> &Arc<StateManager> {
        self.executor.state()
    }

    pub fn automod(&self) -> &AutomodEngine {
        &self.automod
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Runs a slash command. Missing options take their declared default;
    /// a required option without one is an error. Undeclared arguments are
    /// passed through unchanged.
    #[tracing::instrument(level = "debug", skip(self, args, environment))]
    pub async fn invoke_command(
        &self,
        name: &str,
        args: ValueMap,
        environment: Environment,
    ) -> RuntimeResult<ExecutionReport> {
        let command = self
            .spec
            .command(name)
            .ok_or_else(|| Error::CommandNotFound(name.to_string()))?;

        let mut resolved = args;
        for option in &command.options {
            let provided = resolved.get(&option.name).is_some_and(|v| !v.is_null());
            if provided {
                continue;
            }
            match &option.default {
                Some(default) => {
                    resolved.insert(option.name.clone(), default.clone());
                }
                None if option.required => {
                    return Err(Error::MissingOption {
                        command: command.name.clone(),
                        option: option.name.clone(),
                    });
                }
                None => {}
            }
        }

        let mut ctx = self
            .executor
            .new_context(environment, resolved, Value::Null)
            .await;
        let report = self.executor.execute(&command.actions, &mut ctx).await;
        debug!(command = name, success = report.is_success(), "Command finished");
        Ok(report)
    }

    /// Dispatches one inbound event.
    ///
    /// Message events go through automod first. When a rule matches, its
    /// actions run and, with `stop_on_match`, the event handlers are skipped.
    /// Each handler whose `when` guard passes then runs in its own context.
    #[tracing::instrument(level = "debug", skip_all, fields(event = event.name()))]
    pub async fn handle_event(&self, event: InboundEvent) -> RuntimeResult<EventOutcome> {
        let mut outcome = EventOutcome::default();

        if event.kind.carries_message() && !self.automod.is_empty() {
            if let Some(content) = event.environment.message.as_ref().map(|m| m.content.clone()) {
                let ctx = self
                    .executor
                    .new_context(event.environment.clone(), ValueMap::new(), event.data.clone())
                    .await;
                let checked = self.automod.check(&content, &ctx);
                if !checked.passed {
                    let report = self
                        .automod
                        .execute_actions(&checked.matches, &ctx, &self.executor)
                        .await;
                    outcome.moderation = Some(report);
                }
                let stop = !checked.passed && self.automod.stop_on_match();
                outcome.automod = Some(checked);
                if stop {
                    debug!("Event handlers skipped after automod match");
                    return Ok(outcome);
                }
            }
        }

        for handler in self.spec.handlers_for(event.name()) {
            let mut ctx = self
                .executor
                .new_context(event.environment.clone(), ValueMap::new(), event.data.clone())
                .await;
            if let Some(guard) = &handler.when {
                match self.executor.evaluator().condition(guard, &ctx) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(event = event.name(), "Handler guard failed: {}", e);
                        continue;
                    }
                }
            }
            let report = self.executor.execute(&handler.actions, &mut ctx).await;
            outcome.handlers.push(report);
        }
        Ok(outcome)
    }

    /// Feeds custom and timer events published on the bus back into
    /// [`Runtime::handle_event`] until [`Runtime::shutdown`] is called.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = self.clone();
        let mut receiver = self.events.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Event loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Event loop received shutdown signal");
                        break;
                    }
                    received = receiver.recv() => match received {
                        Ok(event) if matches!(event.kind, EventKind::Custom | EventKind::Timer) => {
                            if let Err(e) = runtime.handle_event(event).await {
                                warn!("Failed to handle event: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(EventError::Lagged { count }) => {
                            warn!(count, "Event loop lagged behind");
                        }
                        Err(e) => {
                            warn!("Event loop stopped: {}", e);
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stops the event loop, cancels pending timers and closes the storage.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        info!("Shutting down runtime");
        // No receivers just means no event loop was spawned.
        let _ = self.shutdown_tx.send(());
        self.executor.timers().cancel_all();
        self.state().storage().close().await?;
        Ok(())
    }
}
