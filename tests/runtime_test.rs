mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowbot::config::RuntimeConfig;
use flowbot::event::{Environment, EventKind, InboundEvent};
use flowbot::platform::RecordingPlatform;
use flowbot::state::{InMemoryStorage, ScopeContext};
use flowbot::{Runtime, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_conditional_command() {
    let (runtime, platform) = common::runtime(json!({
        "commands": [{
            "name": "check",
            "options": [{"name": "value", "required": true}],
            "actions": [{
                "action": "flow_if",
                "if": "args.value > 10",
                "then": [{"action": "reply", "content": "gt10"}],
                "else": [{"action": "reply", "content": "le10"}]
            }]
        }]
    }))
    .await;

    for value in [15, 5, 10] {
        runtime
            .invoke_command("check", common::map(json!({"value": value})), common::environment())
            .await
            .unwrap();
    }
    assert_eq!(platform.sent_contents(), vec!["gt10", "le10", "le10"]);
}

#[tokio::test]
async fn test_bounded_loop_over_declared_state() {
    let (runtime, platform) = common::runtime(json!({
        "state": {"variables": {"counter": {"scope": "guild", "default": 0}}},
        "commands": [{"name": "count", "actions": [
            {"action": "flow_while", "while": "state.guild.counter < 3", "do": [
                {"action": "increment", "var": "counter"}
            ]},
            {"action": "reply", "content": "counted ${state.guild.counter}"},
            {"action": "flow_while", "while": "true", "max_iterations": 4, "do": [
                {"action": "increment", "var": "spins"}
            ]},
            {"action": "reply", "content": "spun ${spins}"}
        ]}]
    }))
    .await;

    let report = runtime
        .invoke_command("count", Default::default(), common::environment())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(platform.sent_contents(), vec!["counted 3", "spun 4"]);
    let stored = runtime
        .state()
        .get("counter", &ScopeContext::new().with_guild("42"))
        .await
        .unwrap();
    assert_eq!(stored, Value::Integer(3));
}

#[tokio::test]
async fn test_call_flow_and_try() {
    let (runtime, platform) = common::runtime(json!({
        "flows": [
            {"name": "calculate", "params": [{"name": "a"}, {"name": "b"}], "returns": "args.a + args.b"},
            {"name": "explode", "actions": [{"action": "throw", "message": "bad input"}]}
        ],
        "commands": [{"name": "math", "actions": [
            {"action": "call_flow", "flow": "calculate", "args": {"a": 5, "b": 3}, "as": "sum"},
            {"action": "reply", "content": "sum ${sum}"},
            {"action": "try",
             "do": [{"action": "call_flow", "flow": "explode"}],
             "catch": [{"action": "reply", "content": "caught ${error.message}"}],
             "finally": [{"action": "reply", "content": "finally"}]}
        ]}]
    }))
    .await;

    let report = runtime
        .invoke_command("math", Default::default(), common::environment())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(
        platform.sent_contents(),
        vec!["sum 8", "caught bad input", "finally"]
    );
}

fn message_event(content: &str, sent: DateTime<Utc>) -> InboundEvent {
    let environment: Environment = serde_json::from_value(json!({
        "user": {"id": "9"},
        "guild": {"id": "42"},
        "channel": {"id": "7"},
        "message": {"id": "100", "content": content, "timestamp": sent}
    }))
    .unwrap();
    InboundEvent::new(EventKind::MessageCreate, environment)
}

#[tokio::test]
async fn test_automod_rate_limit_before_handlers() {
    let (runtime, platform) = common::runtime(json!({
        "automod": {"rules": [{
            "name": "spam",
            "trigger": {"type": "spam", "messages": 5, "window": "10s"},
            "actions": [{"action": "reply", "content": "slow down"}]
        }]},
        "events": [{"event": "message_create", "actions": [
            {"action": "increment", "var": "seen"}
        ]}]
    }))
    .await;

    let start = Utc::now();
    let mut moderated = Vec::new();
    for i in 0..5 {
        let sent = start + chrono::Duration::milliseconds(i * 2250);
        let outcome = runtime.handle_event(message_event("hello", sent)).await.unwrap();
        moderated.push(outcome.was_moderated());
        if outcome.was_moderated() {
            assert!(outcome.handlers.is_empty());
            assert_eq!(outcome.automod.unwrap().rules(), vec!["spam"]);
        } else {
            assert_eq!(outcome.handlers.len(), 1);
        }
    }
    assert_eq!(moderated, vec![false, false, false, false, true]);
    assert_eq!(platform.sent_contents(), vec!["slow down"]);
}

#[tokio::test]
async fn test_handlers_run_after_match_when_configured() {
    let config = RuntimeConfig::from_str(r#"{"automod": {"stop_on_match": false}}"#).unwrap();
    let spec = common::spec(json!({
        "automod": {"rules": [{"name": "words", "trigger": {"type": "keyword", "keywords": ["spoiler"]}}]},
        "events": [{"event": "message_create", "actions": [
            {"action": "reply", "content": "seen ${message.content}"}
        ]}]
    }));
    let platform = Arc::new(RecordingPlatform::new());
    let runtime = Runtime::new(spec, config, Arc::new(InMemoryStorage::new()), platform.clone())
        .await
        .unwrap();

    let outcome = runtime
        .handle_event(message_event("big spoiler", Utc::now()))
        .await
        .unwrap();
    assert!(outcome.was_moderated());
    assert_eq!(outcome.handlers.len(), 1);
    assert_eq!(platform.sent_contents(), vec!["seen big spoiler"]);
}

#[tokio::test]
async fn test_timer_events_reach_handlers() {
    let (runtime, platform) = common::runtime(json!({
        "commands": [{"name": "remind", "actions": [
            {"action": "create_timer", "delay": 20, "event": "reminder", "data": {"text": "stretch"}}
        ]}],
        "events": [{"event": "reminder", "actions": [
            {"action": "send_message", "content": "${event.text}"}
        ]}]
    }))
    .await;
    let runtime = Arc::new(runtime);
    let event_loop = runtime.spawn_event_loop();

    runtime
        .invoke_command("remind", Default::default(), common::environment())
        .await
        .unwrap();

    let mut sent = Vec::new();
    for _ in 0..100 {
        sent = platform.sent_contents();
        if !sent.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sent, vec!["stretch"]);

    runtime.shutdown().await.unwrap();
    event_loop.await.unwrap();
}
