//! Moderation rule definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use super::action::Action;
use crate::duration;

/// Accepts either a single item or a list of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomodSpec {
    #[serde(default)]
    pub rules: Vec<AutomodRule>,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomodRule {
    pub name: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(alias = "trigger")]
    pub triggers: OneOrMany<Trigger>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub exempt: Exemptions,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exemptions {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Exemptions {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.users.is_empty()
            && self.channels.is_empty()
            && self.permissions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keyword {
    Plain(String),
    Detailed {
        word: String,
        #[serde(default)]
        allowed: Vec<String>,
    },
}

impl Keyword {
    pub fn word(&self) -> &str {
        match self {
            Keyword::Plain(word) | Keyword::Detailed { word, .. } => word,
        }
    }

    pub fn allowed(&self) -> &[String] {
        match self {
            Keyword::Plain(_) => &[],
            Keyword::Detailed { allowed, .. } => allowed,
        }
    }
}

fn caps_threshold() -> f64 {
    70.0
}

fn caps_min_length() -> usize {
    0
}

fn attachment_max() -> usize {
    1
}

fn emoji_max() -> usize {
    10
}

fn mention_max() -> usize {
    5
}

fn newline_max() -> usize {
    10
}

fn spam_messages() -> usize {
    5
}

fn spam_window() -> Duration {
    Duration::from_secs(10)
}

fn duplicate_count() -> usize {
    3
}

fn duplicate_window() -> Duration {
    Duration::from_secs(60)
}

/// A single matcher. Count-based triggers fire once the count reaches the
/// configured limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Keyword {
        keywords: Vec<Keyword>,
    },
    Regex {
        patterns: OneOrMany<String>,
    },
    Link {
        #[serde(default)]
        blocked: Vec<String>,
        #[serde(default)]
        allowed: Vec<String>,
    },
    Invite {
        #[serde(default)]
        allowed: Vec<String>,
    },
    Caps {
        #[serde(default = "caps_threshold")]
        threshold: f64,
        #[serde(default = "caps_min_length")]
        min_length: usize,
    },
    Emoji {
        #[serde(default = "emoji_max")]
        max: usize,
    },
    Mention {
        #[serde(default = "mention_max")]
        max: usize,
    },
    Newline {
        #[serde(default = "newline_max")]
        max: usize,
    },
    Attachment {
        #[serde(default)]
        blocked_extensions: Vec<String>,
        #[serde(default)]
        allowed_extensions: Vec<String>,
        /// Attachment count that matches when no extension list is given.
        #[serde(default = "attachment_max")]
        max: usize,
    },
    Spam {
        #[serde(default = "spam_messages")]
        messages: usize,
        #[serde(default = "spam_window", with = "duration::flexible")]
        window: Duration,
    },
    Duplicate {
        #[serde(default = "duplicate_count")]
        count: usize,
        #[serde(default = "duplicate_window", with = "duration::flexible")]
        window: Duration,
    },
}
