use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::{StateError, StateResult};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateScope {
    Global,
    #[default]
    Guild,
    Channel,
    User,
    Member,
}

impl StateScope {
    pub const ALL: [StateScope; 5] = [
        StateScope::Global,
        StateScope::Guild,
        StateScope::Channel,
        StateScope::User,
        StateScope::Member,
    ];
}

/// Identifiers available to the current invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeContext {
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
}

impl ScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild(mut self, id: impl Into<String>) -> Self {
        self.guild_id = Some(id.into());
        self
    }

    pub fn with_channel(mut self, id: impl Into<String>) -> Self {
        self.channel_id = Some(id.into());
        self
    }

    pub fn with_user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeIds {
    Global,
    Guild(String),
    Channel(String),
    User(String),
    Member { guild: String, user: String },
}

/// Fully qualified variable address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub name: String,
    pub ids: ScopeIds,
}

impl StateKey {
    pub fn resolve(name: &str, scope: StateScope, ctx: &ScopeContext) -> StateResult<Self> {
        let require = |id: &Option<String>, what: &str| {
            id.clone().ok_or_else(|| StateError::InvalidScopeContext {
                name: name.to_string(),
                scope,
                missing: what.to_string(),
            })
        };
        let ids = match scope {
            StateScope::Global => ScopeIds::Global,
            StateScope::Guild => ScopeIds::Guild(require(&ctx.guild_id, "guild_id")?),
            StateScope::Channel => ScopeIds::Channel(require(&ctx.channel_id, "channel_id")?),
            StateScope::User => ScopeIds::User(require(&ctx.user_id, "user_id")?),
            StateScope::Member => ScopeIds::Member {
                guild: require(&ctx.guild_id, "guild_id")?,
                user: require(&ctx.user_id, "user_id")?,
            },
        };
        Ok(Self {
            name: name.to_string(),
            ids,
        })
    }

    pub fn scope(&self) -> StateScope {
        match self.ids {
            ScopeIds::Global => StateScope::Global,
            ScopeIds::Guild(_) => StateScope::Guild,
            ScopeIds::Channel(_) => StateScope::Channel,
            ScopeIds::User(_) => StateScope::User,
            ScopeIds::Member { .. } => StateScope::Member,
        }
    }

    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ids {
            ScopeIds::Global => write!(f, "global:{}", self.name),
            ScopeIds::Guild(id) => write!(f, "guild:{}:{}", id, self.name),
            ScopeIds::Channel(id) => write!(f, "channel:{}:{}", id, self.name),
            ScopeIds::User(id) => write!(f, "user:{}:{}", id, self.name),
            ScopeIds::Member { guild, user } => {
                write!(f, "member:{}:{}:{}", guild, user, self.name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn full_context() -> ScopeContext {
        ScopeContext::new()
            .with_guild("42")
            .with_channel("7")
            .with_user("9")
    }

    #[test]
    fn test_storage_keys() {
        let ctx = full_context();
        let rendered: Vec<String> = StateScope::ALL
            .iter()
            .map(|scope| StateKey::resolve("counter", *scope, &ctx).unwrap().storage_key())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "global:counter",
                "guild:42:counter",
                "channel:7:counter",
                "user:9:counter",
                "member:42:9:counter",
            ]
        );
    }

    #[test]
    fn test_missing_ids_are_rejected() {
        let ctx = ScopeContext::new().with_user("9");
        let err = StateKey::resolve("xp", StateScope::Member, &ctx).unwrap_err();
        assert!(matches!(
            err,
            StateError::InvalidScopeContext { ref missing, .. } if missing == "guild_id"
        ));
        assert!(StateKey::resolve("xp", StateScope::Global, &ScopeContext::new()).is_ok());
    }

    #[test]
    fn test_structural_equality() {
        let ctx = full_context();
        let a = StateKey::resolve("n", StateScope::Guild, &ctx).unwrap();
        let b = StateKey::resolve("n", StateScope::Guild, &ctx.clone().with_user("1")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.scope(), StateScope::Guild);
        assert_eq!("member".parse::<StateScope>().unwrap(), StateScope::Member);
    }
}
