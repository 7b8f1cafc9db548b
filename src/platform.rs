//! Chat platform client abstraction.
//!
//! The runtime never speaks a platform wire protocol. Leaf actions call a
//! [`PlatformClient`]; adapters for concrete platforms live outside this
//! crate. [`RecordingPlatform`] records every call and is used for dry runs.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::spec::action::VoiceOperation;
use crate::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Missing permission: {0}")]
    MissingPermission(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Platform API error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Value>,
    #[serde(default)]
    pub ephemeral: bool,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty)
            && self.embeds.is_empty()
            && self.components.is_empty()
    }
}

/// What a reply answers: an interaction, a message, or just a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub channel_id: Option<String>,
    pub message_id: Option<String>,
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceCommand {
    pub operation: VoiceOperation,
    pub guild_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Operations leaf actions may perform on the chat platform. Every call
/// returns a platform-specific description of the result (for example the
/// created message) which the executor records as action data.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_message(&self, channel_id: &str, payload: MessagePayload) -> Result<Value, PlatformError>;

    async fn reply(&self, target: &ReplyTarget, payload: MessagePayload) -> Result<Value, PlatformError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: MessagePayload,
    ) -> Result<Value, PlatformError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<Value, PlatformError>;

    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<Value, PlatformError>;

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<Value, PlatformError>;

    async fn set_nickname(&self, guild_id: &str, user_id: &str, nickname: &str) -> Result<Value, PlatformError>;

    async fn voice(&self, command: VoiceCommand) -> Result<Value, PlatformError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformCall {
    pub operation: &'static str,
    pub details: Value,
}

/// Client that records calls instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    failing: Mutex<Vec<&'static str>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call to `operation` fail with an API error.
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(operation);
        }
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation)
            .collect()
    }

    /// Contents of every sent message and reply, in order.
    pub fn sent_contents(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call.operation, "send_message" | "reply"))
            .filter_map(|call| call.details.get_path("content").map(|c| c.to_string()))
            .collect()
    }

    fn record(&self, operation: &'static str, details: serde_json::Value) -> Result<Value, PlatformError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&operation))
            .unwrap_or(false);
        if failing {
            return Err(PlatformError::Api(format!("{} failed", operation)));
        }
        let details = Value::from(details);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(PlatformCall {
                operation,
                details: details.clone(),
            });
        }
        Ok(details)
    }
}

fn payload_json(payload: &MessagePayload) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or_default()
}

#[async_trait]
impl PlatformClient for RecordingPlatform {
    async fn send_message(&self, channel_id: &str, payload: MessagePayload) -> Result<Value, PlatformError> {
        let mut details = payload_json(&payload);
        details["channel_id"] = json!(channel_id);
        self.record("send_message", details)
    }

    async fn reply(&self, target: &ReplyTarget, payload: MessagePayload) -> Result<Value, PlatformError> {
        let mut details = payload_json(&payload);
        details["channel_id"] = json!(target.channel_id);
        details["reply_to"] = json!(target.interaction_id.as_ref().or(target.message_id.as_ref()));
        self.record("reply", details)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: MessagePayload,
    ) -> Result<Value, PlatformError> {
        let mut details = payload_json(&payload);
        details["channel_id"] = json!(channel_id);
        details["message_id"] = json!(message_id);
        self.record("edit_message", details)
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<Value, PlatformError> {
        self.record(
            "delete_message",
            json!({"channel_id": channel_id, "message_id": message_id}),
        )
    }

    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<Value, PlatformError> {
        self.record(
            "assign_role",
            json!({"guild_id": guild_id, "user_id": user_id, "role_id": role_id}),
        )
    }

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<Value, PlatformError> {
        self.record(
            "remove_role",
            json!({"guild_id": guild_id, "user_id": user_id, "role_id": role_id}),
        )
    }

    async fn set_nickname(&self, guild_id: &str, user_id: &str, nickname: &str) -> Result<Value, PlatformError> {
        self.record(
            "set_nickname",
            json!({"guild_id": guild_id, "user_id": user_id, "nickname": nickname}),
        )
    }

    async fn voice(&self, command: VoiceCommand) -> Result<Value, PlatformError> {
        self.record("voice", serde_json::to_value(&command).unwrap_or_default())
    }
}
