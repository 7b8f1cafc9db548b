//! Message moderation.
//!
//! [`AutomodEngine::check`] runs the declared rules against a message and
//! collects every trigger that matched. [`AutomodEngine::execute_actions`]
//! then runs the actions of each matched rule with `automod` bound.

pub mod triggers;
pub mod window;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AutomodConfig;
use crate::executor::{ActionContext, ActionExecutor, ControlFlow, ExecutionReport};
use crate::expression::pattern::compile_pattern;
use crate::expression::ExpressionEvaluator;
use crate::spec::automod::Exemptions;
use crate::spec::{AutomodRule, AutomodSpec, Trigger};
use crate::value::{Value, ValueMap};

pub use window::MessageWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomodMatch {
    pub rule: String,
    pub trigger: String,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomodOutcome {
    pub passed: bool,
    pub matches: Vec<AutomodMatch>,
}

impl AutomodOutcome {
    /// Names of matched rules, each once, in rule order.
    pub fn rules(&self) -> Vec<&str> {
        rule_names(&self.matches)
    }
}

/// Longest rate window and largest rate threshold across all rules.
fn rate_bounds(rules: &[AutomodRule]) -> (std::time::Duration, usize) {
    rules
        .iter()
        .flat_map(|rule| rule.triggers.as_slice())
        .fold((std::time::Duration::ZERO, 0), |(span, threshold), trigger| match trigger {
            Trigger::Spam { messages, window } => (span.max(*window), threshold.max(*messages)),
            Trigger::Duplicate { count, window } => (span.max(*window), threshold.max(*count)),
            _ => (span, threshold),
        })
}

fn rule_names(matches: &[AutomodMatch]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for m in matches {
        if !names.contains(&m.rule.as_str()) {
            names.push(&m.rule);
        }
    }
    names
}

pub struct AutomodEngine {
    rules: Vec<AutomodRule>,
    evaluator: Arc<ExpressionEvaluator>,
    window: MessageWindow,
    /// Compiled user patterns; `None` marks a rejected one.
    patterns: DashMap<String, Option<Regex>>,
    config: AutomodConfig,
}

impl AutomodEngine {
    pub fn new(spec: &AutomodSpec, evaluator: Arc<ExpressionEvaluator>, config: AutomodConfig) -> Self {
        debug!(rules = spec.rules.len(), "Creating AutomodEngine");
        let (retention, threshold) = rate_bounds(&spec.rules);
        Self {
            rules: spec.rules.clone(),
            evaluator,
            window: MessageWindow::new(config.history_limit.max(threshold), retention),
            patterns: DashMap::new(),
            config,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|rule| !rule.enabled)
    }

    fn tracks_history(&self) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.enabled)
            .flat_map(|rule| rule.triggers.as_slice())
            .any(|trigger| matches!(trigger, Trigger::Spam { .. } | Trigger::Duplicate { .. }))
    }

    /// Number of remembered message windows.
    pub fn tracked_windows(&self) -> usize {
        self.window.len()
    }

    pub fn stop_on_match(&self) -> bool {
        self.config.stop_on_match
    }

    pub fn rule(&self, name: &str) -> Option<&AutomodRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Evaluates every enabled rule against `content`.
    ///
    /// The message is remembered for the spam and duplicate triggers before
    /// any rule runs, so the current message counts towards its own window.
    #[tracing::instrument(level = "debug", skip_all, fields(rules = self.rules.len()))]
    pub fn check(&self, content: &str, ctx: &ActionContext) -> AutomodOutcome {
        let env = &ctx.environment;
        let user_id = env.user_id().unwrap_or_default();
        let channel_id = env.channel_id().unwrap_or_default();
        let now = env
            .message
            .as_ref()
            .and_then(|message| message.timestamp)
            .unwrap_or_else(Utc::now);
        if self.tracks_history() {
            self.window.record(user_id, channel_id, now, content);
        }

        let attachments = env
            .message
            .as_ref()
            .map(|message| message.attachments.as_slice())
            .unwrap_or_default();

        let mut matches = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.enabled) {
            if is_exempt(&rule.exempt, ctx) {
                debug!(rule = %rule.name, "Rule skipped by exemption");
                continue;
            }
            if let Some(guard) = &rule.when {
                match self.evaluator.condition(guard, ctx) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(rule = %rule.name, "Rule guard failed: {}", e);
                        continue;
                    }
                }
            }
            for trigger in rule.triggers.as_slice() {
                let matched = match trigger {
                    Trigger::Keyword { keywords } => triggers::keywords(content, keywords),
                    Trigger::Regex { patterns } => {
                        let compiled = self.compiled(&rule.name, patterns.as_slice());
                        triggers::patterns(content, &compiled)
                    }
                    Trigger::Link { blocked, allowed } => triggers::links(content, blocked, allowed),
                    Trigger::Invite { allowed } => triggers::invites(content, allowed),
                    Trigger::Caps {
                        threshold,
                        min_length,
                    } => triggers::caps(content, *threshold, *min_length),
                    Trigger::Emoji { max } => triggers::emoji(content, *max),
                    Trigger::Mention { max } => triggers::mentions(content, *max),
                    Trigger::Newline { max } => triggers::newlines(content, *max),
                    Trigger::Attachment {
                        blocked_extensions,
                        allowed_extensions,
                        max,
                    } => triggers::attachments(
                        attachments,
                        blocked_extensions,
                        allowed_extensions,
                        *max,
                    ),
                    Trigger::Spam { messages, window: span } => {
                        let count = self.window.count_within(user_id, channel_id, now, *span);
                        (count >= *messages).then(|| vec![format!("{} messages", count)])
                    }
                    Trigger::Duplicate { count, window: span } => {
                        let seen = self
                            .window
                            .duplicates_within(user_id, channel_id, now, *span, content);
                        (seen >= *count).then(|| vec![window::normalize(content)])
                    }
                };
                if let Some(matched) = matched {
                    info!(rule = %rule.name, trigger = trigger.as_ref(), "Automod rule matched");
                    matches.push(AutomodMatch {
                        rule: rule.name.clone(),
                        trigger: trigger.as_ref().to_string(),
                        matched,
                    });
                }
            }
        }

        AutomodOutcome {
            passed: matches.is_empty(),
            matches,
        }
    }

    fn compiled(&self, rule: &str, patterns: &[String]) -> Vec<Regex> {
        patterns
            .iter()
            .filter_map(|pattern| {
                self.patterns
                    .entry(pattern.clone())
                    .or_insert_with(|| match compile_pattern(pattern, false) {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            warn!(rule, pattern = %pattern, "Skipping rejected pattern: {}", e);
                            None
                        }
                    })
                    .clone()
            })
            .collect()
    }

    /// Runs the actions of each matched rule once, in rule order.
    ///
    /// `automod` is bound to `{rule, trigger, triggers, matched}` where
    /// `trigger` is the first trigger of the rule that matched. An abort or
    /// uncaught failure stops the remaining rules.
    pub async fn execute_actions(
        &self,
        matches: &[AutomodMatch],
        ctx: &ActionContext,
        executor: &ActionExecutor,
    ) -> ExecutionReport {
        let mut ctx = ctx.fork();
        let mut flow = ControlFlow::Next;
        for name in rule_names(matches) {
            let Some(rule) = self.rule(name) else { continue };
            ctx.automod = Some(binding(name, matches));
            match executor.run_list(&rule.actions, &mut ctx).await {
                ControlFlow::Next | ControlFlow::Return(_) => {}
                stop => {
                    flow = stop;
                    break;
                }
            }
        }
        ExecutionReport::from_flow(ctx.records().await, flow)
    }
}

fn binding(rule: &str, matches: &[AutomodMatch]) -> Value {
    let own: Vec<&AutomodMatch> = matches.iter().filter(|m| m.rule == rule).collect();
    let mut map = ValueMap::new();
    map.insert("rule".to_string(), Value::from(rule));
    map.insert(
        "trigger".to_string(),
        own.first()
            .map(|m| Value::from(m.trigger.as_str()))
            .unwrap_or_default(),
    );
    map.insert(
        "triggers".to_string(),
        Value::List(own.iter().map(|m| Value::from(m.trigger.as_str())).collect()),
    );
    map.insert(
        "matched".to_string(),
        Value::List(
            own.iter()
                .flat_map(|m| m.matched.iter().map(|s| Value::from(s.as_str())))
                .collect(),
        ),
    );
    Value::Map(map)
}

fn is_exempt(exempt: &Exemptions, ctx: &ActionContext) -> bool {
    if exempt.is_empty() {
        return false;
    }
    let env = &ctx.environment;
    if env.user_id().is_some_and(|id| exempt.users.iter().any(|u| u == id)) {
        return true;
    }
    if env
        .channel_id()
        .is_some_and(|id| exempt.channels.iter().any(|c| c == id))
    {
        return true;
    }
    env.member.as_ref().is_some_and(|member| {
        member.roles.iter().any(|role| exempt.roles.contains(role))
            || member
                .permissions
                .iter()
                .any(|permission| exempt.permissions.contains(permission))
    })
}
