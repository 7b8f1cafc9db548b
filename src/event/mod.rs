//! Inbound events and their environment.
//!
//! An [`InboundEvent`] is what a platform adapter hands the runtime: the
//! event kind, the typed [`Environment`] it happened in (user, member,
//! guild, channel, message) and free-form event data. Custom events raised
//! by `emit` actions and timers carry their own name.

pub mod event_bus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::state::ScopeContext;
use crate::value::{Value, ValueMap};

pub use event_bus::{EventBus, EventError, EventReceiver, EventResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Ready,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MemberJoin,
    MemberLeave,
    ReactionAdd,
    ReactionRemove,
    InteractionCreate,
    VoiceStateUpdate,
    Timer,
    Custom,
}

impl EventKind {
    /// Events whose content automod inspects.
    pub fn carries_message(&self) -> bool {
        matches!(self, EventKind::MessageCreate | EventKind::MessageUpdate)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

impl Attachment {
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Where an event happened and who caused it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild: Option<GuildInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
}

fn to_value<T: Serialize>(item: &T) -> Value {
    serde_json::to_value(item).map(Value::from).unwrap_or_default()
}

impl Environment {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn guild_id(&self) -> Option<&str> {
        self.guild.as_ref().map(|g| g.id.as_str())
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.id.as_str())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message.as_ref().map(|m| m.id.as_str())
    }

    pub fn scope_context(&self) -> ScopeContext {
        ScopeContext {
            guild_id: self.guild_id().map(str::to_string),
            channel_id: self.channel_id().map(str::to_string),
            user_id: self.user_id().map(str::to_string),
        }
    }

    /// Expression roots for each present part (`user`, `member`, ...).
    pub fn to_values(&self) -> ValueMap {
        let mut roots = ValueMap::new();
        if let Some(user) = &self.user {
            roots.insert("user".to_string(), to_value(user));
        }
        if let Some(member) = &self.member {
            roots.insert("member".to_string(), to_value(member));
        }
        if let Some(guild) = &self.guild {
            roots.insert("guild".to_string(), to_value(guild));
        }
        if let Some(channel) = &self.channel {
            roots.insert("channel".to_string(), to_value(channel));
        }
        if let Some(message) = &self.message {
            roots.insert("message".to_string(), to_value(message));
        }
        roots
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// Name of a custom or timer event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub data: Value,
}

impl InboundEvent {
    pub fn new(kind: EventKind, environment: Environment) -> Self {
        Self {
            kind,
            name: None,
            environment,
            data: Value::Null,
        }
    }

    pub fn custom(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Custom,
            name: Some(name.into()),
            environment: Environment::default(),
            data,
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// The name handlers are matched against.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.as_ref())
    }
}
