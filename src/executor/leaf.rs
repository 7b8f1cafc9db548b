use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::context::ActionContext;
use super::data;
use super::result::{ActionError, TimerError};
use super::ActionExecutor;
use crate::duration::parse_duration;
use crate::event::InboundEvent;
use crate::pipe::PipeRequest;
use crate::platform::{MessagePayload, ReplyTarget, VoiceCommand};
use crate::spec::action::LogLevel;
use crate::spec::{Action, ActionKind};
use crate::state::storage::QueryOptions;
use crate::state::{add_numbers, negate, StateError, StateResult};
use crate::value::{Value, ValueMap};

impl ActionExecutor {
    /// Runs an action that does not nest other actions and returns its data.
    pub(super) async fn run_leaf(
        &self,
        action: &Action,
        ctx: &mut ActionContext,
    ) -> Result<Value, ActionError> {
        match &action.kind {
            // data
            ActionKind::Set { var, value } => {
                let value = self.resolve(value, ctx)?;
                self.assign(var, value, ctx).await
            }
            ActionKind::Increment { var, by } => {
                let by = self.resolve(by, ctx)?;
                self.add(var, by, ctx).await
            }
            ActionKind::Decrement { var, by } => {
                let by = negate(&self.resolve(by, ctx)?);
                self.add(var, by, ctx).await
            }
            ActionKind::ListPush { var, value } => {
                let item = self.resolve(value, ctx)?;
                self.mutate(var, ctx, move |current| data::list_push(var, current, item))
                    .await
            }
            ActionKind::ListRemove { var, index, value } => {
                let index = match index {
                    Some(index) => Some(self.integer(index, "index", ctx)?),
                    None => None,
                };
                let value = match value {
                    Some(value) => Some(self.resolve(value, ctx)?),
                    None => None,
                };
                let mut removed = Value::Null;
                self.mutate(var, ctx, |current| {
                    let (next, taken) = data::list_remove(var, current, index, value.as_ref())?;
                    removed = taken;
                    Ok(next)
                })
                .await?;
                Ok(removed)
            }
            ActionKind::SetMap { var, key, value } => {
                let key = self.interpolate(key, ctx)?;
                let value = self.resolve(value, ctx)?;
                self.mutate(var, ctx, |current| data::set_map(var, current, &key, value))
                    .await
            }
            ActionKind::DeleteMap { var, key } => {
                let key = self.interpolate(key, ctx)?;
                let mut removed = Value::Null;
                self.mutate(var, ctx, |current| {
                    let (next, taken) = data::delete_map(var, current, &key)?;
                    removed = taken;
                    Ok(next)
                })
                .await?;
                Ok(removed)
            }

            // platform
            ActionKind::SendMessage {
                channel,
                content,
                embeds,
                components,
            } => {
                let channel_id = self.target(channel, ctx.environment.channel_id(), "channel", ctx)?;
                let payload = self.payload(content, embeds, components, false, ctx)?;
                Ok(self.platform.send_message(&channel_id, payload).await?)
            }
            ActionKind::Reply {
                content,
                embeds,
                components,
                ephemeral,
            } => {
                let env = &ctx.environment;
                let target = ReplyTarget {
                    channel_id: env.channel_id().map(str::to_string),
                    message_id: env.message_id().map(str::to_string),
                    interaction_id: env.interaction_id.clone(),
                };
                if target.channel_id.is_none() && target.interaction_id.is_none() {
                    return Err(ActionError::runtime("reply needs a channel or an interaction"));
                }
                let payload = self.payload(content, embeds, components, *ephemeral, ctx)?;
                Ok(self.platform.reply(&target, payload).await?)
            }
            ActionKind::EditMessage {
                channel,
                message,
                content,
                embeds,
            } => {
                let channel_id = self.target(channel, ctx.environment.channel_id(), "channel", ctx)?;
                let message_id = self.target(message, ctx.environment.message_id(), "message", ctx)?;
                let payload = self.payload(content, embeds, &None, false, ctx)?;
                Ok(self
                    .platform
                    .edit_message(&channel_id, &message_id, payload)
                    .await?)
            }
            ActionKind::DeleteMessage { channel, message } => {
                let channel_id = self.target(channel, ctx.environment.channel_id(), "channel", ctx)?;
                let message_id = self.target(message, ctx.environment.message_id(), "message", ctx)?;
                Ok(self.platform.delete_message(&channel_id, &message_id).await?)
            }
            ActionKind::AssignRole { user, role } => {
                let guild_id = self.guild(ctx)?;
                let user_id = self.target(user, ctx.environment.user_id(), "user", ctx)?;
                let role = self.interpolate(role, ctx)?;
                Ok(self.platform.add_role(&guild_id, &user_id, &role).await?)
            }
            ActionKind::RemoveRole { user, role } => {
                let guild_id = self.guild(ctx)?;
                let user_id = self.target(user, ctx.environment.user_id(), "user", ctx)?;
                let role = self.interpolate(role, ctx)?;
                Ok(self.platform.remove_role(&guild_id, &user_id, &role).await?)
            }
            ActionKind::SetNickname { user, nickname } => {
                let guild_id = self.guild(ctx)?;
                let user_id = self.target(user, ctx.environment.user_id(), "user", ctx)?;
                let nickname = self.interpolate(nickname, ctx)?;
                Ok(self
                    .platform
                    .set_nickname(&guild_id, &user_id, &nickname)
                    .await?)
            }
            ActionKind::Voice {
                operation,
                channel,
                source,
                volume,
            } => {
                let command = VoiceCommand {
                    operation: *operation,
                    guild_id: self.guild(ctx)?,
                    channel_id: self.optional(channel, ctx)?,
                    source: self.optional(source, ctx)?,
                    volume: match volume {
                        Some(volume) => Some(self.resolve(volume, ctx)?.as_f64().ok_or_else(
                            || ActionError::runtime("voice volume must be a number"),
                        )?),
                        None => None,
                    },
                };
                Ok(self.platform.voice(command).await?)
            }

            // tables
            ActionKind::DbInsert { table, row } => {
                let row = self.resolve_map(row, ctx)?;
                Ok(Value::Map(self.state.insert(table, row).await?))
            }
            ActionKind::DbUpdate { table, filter, set } => {
                let filter = self.resolve_map(filter, ctx)?;
                let changes = self.resolve_map(set, ctx)?;
                let updated = self.state.update_rows(table, &filter, &changes).await?;
                Ok(Value::Integer(updated as i64))
            }
            ActionKind::DbDelete { table, filter } => {
                let filter = self.resolve_map(filter, ctx)?;
                let deleted = self.state.delete_rows(table, &filter).await?;
                Ok(Value::Integer(deleted as i64))
            }
            ActionKind::DbQuery {
                table,
                filter,
                order_by,
                descending,
                limit,
                offset,
            } => {
                let options = QueryOptions {
                    filter: self.resolve_map(filter, ctx)?,
                    order_by: order_by.clone(),
                    descending: *descending,
                    limit: match limit {
                        Some(limit) => Some(self.integer(limit, "limit", ctx)?.max(0) as usize),
                        None => None,
                    },
                    offset: match offset {
                        Some(offset) => self.integer(offset, "offset", ctx)?.max(0) as usize,
                        None => 0,
                    },
                };
                let rows = self.state.query(table, &options).await?;
                Ok(Value::List(rows.into_iter().map(Value::Map).collect()))
            }

            // timers and events
            ActionKind::CreateTimer {
                id,
                delay,
                event,
                data,
            } => {
                let id = self.optional(id, ctx)?;
                let delay = self.delay(delay, ctx)?;
                let event = self.interpolate(event, ctx)?;
                let data = self.resolve(data, ctx)?;
                let id = self
                    .timers
                    .create(id, delay, event, data, (*ctx.environment).clone());
                Ok(Value::String(id))
            }
            ActionKind::CancelTimer { id } => {
                let id = self.interpolate(id, ctx)?;
                self.timers.cancel(&id)?;
                Ok(Value::Boolean(true))
            }
            ActionKind::Emit { event, data } => {
                let name = self.interpolate(event, ctx)?;
                let data = self.resolve(data, ctx)?;
                self.events.publish(
                    InboundEvent::custom(name, data).with_environment((*ctx.environment).clone()),
                )?;
                Ok(Value::Null)
            }
            ActionKind::PipeRequest {
                pipe,
                method,
                path,
                body,
                headers,
            } => {
                let mut resolved_headers = BTreeMap::new();
                for (name, value) in headers {
                    resolved_headers.insert(name.clone(), self.interpolate(value, ctx)?);
                }
                let request = PipeRequest {
                    method: self.optional(method, ctx)?.unwrap_or_else(|| "GET".to_string()),
                    path: self.optional(path, ctx)?.unwrap_or_default(),
                    body: match body {
                        Some(body) => Some(self.resolve(body, ctx)?),
                        None => None,
                    },
                    headers: resolved_headers,
                };
                let response = self
                    .pipes
                    .call(pipe, request, self.config.pipe_timeout)
                    .await?;
                Ok(response.into_value())
            }
            ActionKind::Log { message, level } => {
                let message = self.interpolate(message, ctx)?;
                match level {
                    LogLevel::Trace => trace!(target: "flowbot::log", "{}", message),
                    LogLevel::Debug => debug!(target: "flowbot::log", "{}", message),
                    LogLevel::Info => info!(target: "flowbot::log", "{}", message),
                    LogLevel::Warn => warn!(target: "flowbot::log", "{}", message),
                    LogLevel::Error => error!(target: "flowbot::log", "{}", message),
                }
                Ok(Value::String(message))
            }
            ActionKind::Wait { duration } => {
                let requested = self.delay(duration, ctx)?;
                let duration = requested.min(self.config.max_wait);
                if duration < requested {
                    warn!(?requested, ?duration, "wait clamped");
                }
                tokio::time::sleep(duration).await;
                Ok(Value::Null)
            }

            other => Err(ActionError::runtime(format!(
                "`{}` is not a leaf action",
                other.as_ref()
            ))),
        }
    }

    /// Writes a declared state variable, or else a local binding.
    async fn assign(
        &self,
        var: &str,
        value: Value,
        ctx: &mut ActionContext,
    ) -> Result<Value, ActionError> {
        if self.state.is_declared(var) {
            let scope = ctx.scope_context();
            self.state.set(var, value.clone(), &scope).await?;
            self.sync_view(var, &value, ctx);
        } else {
            ctx.bindings.insert(var, value.clone())?;
        }
        Ok(value)
    }

    async fn add(&self, var: &str, by: Value, ctx: &mut ActionContext) -> Result<Value, ActionError> {
        if self.state.is_declared(var) {
            let scope = ctx.scope_context();
            let next = self.state.increment(var, &by, &scope).await?;
            self.sync_view(var, &next, ctx);
            return Ok(next);
        }
        let current = self.local(var, ctx)?;
        let next = add_numbers(var, &current, &by)?;
        ctx.bindings.insert(var, next.clone())?;
        Ok(next)
    }

    /// Read-modify-write through the state manager's per-key lock for
    /// declared variables, or directly on the binding otherwise.
    async fn mutate<F>(&self, var: &str, ctx: &mut ActionContext, f: F) -> Result<Value, ActionError>
    where
        F: FnOnce(Value) -> StateResult<Value> + Send,
    {
        if self.state.is_declared(var) {
            let scope = ctx.scope_context();
            let next = self.state.update(var, &scope, f).await?;
            self.sync_view(var, &next, ctx);
            return Ok(next);
        }
        let current = self.local(var, ctx)?;
        let next = f(current)?;
        ctx.bindings.insert(var, next.clone())?;
        Ok(next)
    }

    fn local(&self, var: &str, ctx: &ActionContext) -> Result<Value, ActionError> {
        match ctx.bindings.get(var) {
            Some(value) => Ok(value.clone()),
            None if self.state.is_strict() => {
                Err(StateError::UnknownVariable(var.to_string()).into())
            }
            None => Ok(Value::Null),
        }
    }

    fn sync_view(&self, var: &str, value: &Value, ctx: &mut ActionContext) {
        if let Some(def) = self.state.variable(var) {
            ctx.update_state_view(def.scope.as_ref(), var, value.clone());
        }
    }

    fn optional(
        &self,
        template: &Option<String>,
        ctx: &ActionContext,
    ) -> Result<Option<String>, ActionError> {
        match template {
            Some(template) => Ok(Some(self.interpolate(template, ctx)?)),
            None => Ok(None),
        }
    }

    /// An explicit id, or the one the environment provides.
    fn target(
        &self,
        template: &Option<String>,
        fallback: Option<&str>,
        what: &str,
        ctx: &ActionContext,
    ) -> Result<String, ActionError> {
        self.optional(template, ctx)?
            .filter(|id| !id.is_empty())
            .or_else(|| fallback.map(str::to_string))
            .ok_or_else(|| ActionError::runtime(format!("no {} to act on", what)))
    }

    fn guild(&self, ctx: &ActionContext) -> Result<String, ActionError> {
        ctx.environment
            .guild_id()
            .map(str::to_string)
            .ok_or_else(|| ActionError::runtime("action requires a guild"))
    }

    fn integer(&self, value: &Value, what: &str, ctx: &ActionContext) -> Result<i64, ActionError> {
        let resolved = self.resolve(value, ctx)?;
        resolved.as_i64().ok_or_else(|| {
            ActionError::runtime(format!(
                "{} must be an integer, got {}",
                what,
                resolved.type_name()
            ))
        })
    }

    fn resolve_map(&self, map: &ValueMap, ctx: &ActionContext) -> Result<ValueMap, ActionError> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve(value, ctx)?)))
            .collect()
    }

    /// Accepts a single item or a list of them.
    fn items(&self, value: &Option<Value>, ctx: &ActionContext) -> Result<Vec<Value>, ActionError> {
        match value {
            None => Ok(Vec::new()),
            Some(value) => match self.resolve(value, ctx)? {
                Value::Null => Ok(Vec::new()),
                Value::List(items) => Ok(items),
                single => Ok(vec![single]),
            },
        }
    }

    fn payload(
        &self,
        content: &Option<String>,
        embeds: &Option<Value>,
        components: &Option<Value>,
        ephemeral: bool,
        ctx: &ActionContext,
    ) -> Result<MessagePayload, ActionError> {
        let payload = MessagePayload {
            content: self.optional(content, ctx)?,
            embeds: self.items(embeds, ctx)?,
            components: self.items(components, ctx)?,
            ephemeral,
        };
        if payload.is_empty() {
            return Err(ActionError::runtime("message has no content, embeds or components"));
        }
        Ok(payload)
    }

    /// Milliseconds as a number, or a duration string such as `"5m"`.
    fn delay(&self, value: &Value, ctx: &ActionContext) -> Result<Duration, ActionError> {
        let invalid = |value: &Value| TimerError::InvalidDelay(value.to_string());
        match self.resolve(value, ctx)? {
            Value::Integer(ms) if ms >= 0 => Ok(Duration::from_millis(ms as u64)),
            Value::Float(ms) if ms.is_finite() && ms >= 0.0 => {
                Ok(Duration::from_millis(ms.round() as u64))
            }
            Value::String(text) => {
                parse_duration(&text).map_err(|_| ActionError::from(invalid(&Value::String(text))))
            }
            other => Err(invalid(&other).into()),
        }
    }
}
