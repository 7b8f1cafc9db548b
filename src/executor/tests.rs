use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::event::Environment;
use crate::platform::RecordingPlatform;
use crate::state::StateManager;

struct Harness {
    executor: ActionExecutor,
    platform: Arc<RecordingPlatform>,
}

fn harness(spec: serde_json::Value) -> Harness {
    let spec: Arc<Specification> = Arc::new(serde_json::from_value(spec).unwrap());
    let state = Arc::new(StateManager::in_memory(&spec.state));
    let platform = Arc::new(RecordingPlatform::new());
    let executor = ActionExecutor::new(
        spec,
        state,
        platform.clone(),
        Arc::new(EventBus::new(64)),
        ExecutorConfig::default(),
    );
    Harness { executor, platform }
}

fn environment() -> Environment {
    serde_json::from_value(json!({
        "user": {"id": "9", "name": "ann"},
        "guild": {"id": "42"},
        "channel": {"id": "7"},
        "message": {"id": "100", "content": "hi"}
    }))
    .unwrap()
}

fn actions(value: serde_json::Value) -> Vec<Action> {
    serde_json::from_value(value).unwrap()
}

impl Harness {
    async fn run(&self, list: serde_json::Value, args: serde_json::Value) -> (ExecutionReport, ActionContext) {
        let args = match Value::from(args) {
            Value::Map(map) => map,
            _ => ValueMap::new(),
        };
        let mut ctx = self
            .executor
            .new_context(environment(), args, Value::Null)
            .await;
        let report = self.executor.execute(&actions(list), &mut ctx).await;
        (report, ctx)
    }
}

#[tokio::test]
async fn test_flow_if_branches() {
    let h = harness(json!({}));
    let list = json!([{
        "action": "flow_if",
        "if": "args.value > 10",
        "then": [{"action": "reply", "content": "gt10"}],
        "else": [{"action": "reply", "content": "le10"}]
    }]);
    h.run(list.clone(), json!({"value": 12})).await;
    h.run(list, json!({"value": 3})).await;
    assert_eq!(h.platform.sent_contents(), vec!["gt10", "le10"]);
}

#[tokio::test]
async fn test_flow_switch_matches_stringified_value() {
    let h = harness(json!({}));
    let list = json!([{
        "action": "flow_switch",
        "value": "args.choice",
        "cases": {
            "1": [{"action": "reply", "content": "one"}],
            "red": [{"action": "reply", "content": "color"}]
        },
        "default": [{"action": "reply", "content": "other"}]
    }]);
    h.run(list.clone(), json!({"choice": 1})).await;
    h.run(list.clone(), json!({"choice": "red"})).await;
    h.run(list, json!({"choice": "blue"})).await;
    assert_eq!(h.platform.sent_contents(), vec!["one", "color", "other"]);
}

#[tokio::test]
async fn test_while_loop_is_bounded() {
    let h = harness(json!({}));
    let (report, ctx) = h
        .run(
            json!([
                {"action": "set", "var": "counter", "value": 0},
                {"action": "flow_while", "while": "counter < 3", "do": [
                    {"action": "increment", "var": "counter"}
                ]},
                {"action": "set", "var": "spins", "value": 0},
                {"action": "flow_while", "while": "true", "max_iterations": 5, "do": [
                    {"action": "increment", "var": "spins"}
                ]}
            ]),
            json!({}),
        )
        .await;
    assert!(report.is_success());
    assert_eq!(ctx.bindings.get("counter"), Some(&Value::Integer(3)));
    assert_eq!(ctx.bindings.get("spins"), Some(&Value::Integer(5)));
}

#[tokio::test]
async fn test_repeat_and_batch_bind_loop_variables() {
    let h = harness(json!({}));
    let (_, ctx) = h
        .run(
            json!([
                {"action": "repeat", "times": 3, "do": [
                    {"action": "list_push", "var": "seen", "value": "${index}"}
                ]},
                {"action": "batch", "items": "${args.names}", "as": "name", "each": [
                    {"action": "list_push", "var": "greeted", "value": "${index}:${name}"}
                ]}
            ]),
            json!({"names": ["ann", "bob"]}),
        )
        .await;
    assert_eq!(
        ctx.bindings.get("seen"),
        Some(&Value::from(json!([0, 1, 2])))
    );
    assert_eq!(
        ctx.bindings.get("greeted"),
        Some(&Value::from(json!(["0:ann", "1:bob"])))
    );
}

#[tokio::test]
async fn test_call_flow_returns_value() {
    let h = harness(json!({
        "flows": [{
            "name": "calculate",
            "params": [{"name": "a"}, {"name": "b", "default": 1}],
            "returns": "args.a + args.b"
        }]
    }));
    let (report, ctx) = h
        .run(
            json!([
                {"action": "call_flow", "flow": "calculate", "args": {"a": 5, "b": 3}, "as": "result"},
                {"action": "call_flow", "flow": "calculate", "args": {"a": 5}, "as": "defaulted"},
                {"action": "reply", "content": "${result}"}
            ]),
            json!({}),
        )
        .await;
    assert!(report.is_success());
    assert_eq!(ctx.bindings.get("result"), Some(&Value::Integer(8)));
    assert_eq!(ctx.bindings.get("defaulted"), Some(&Value::Integer(6)));
    assert_eq!(h.platform.sent_contents(), vec!["8"]);
}

#[tokio::test]
async fn test_call_flow_errors() {
    let h = harness(json!({
        "flows": [{"name": "needs", "params": [{"name": "a"}]}]
    }));
    let (report, _) = h
        .run(
            json!([
                {"action": "call_flow", "flow": "missing"},
                {"action": "call_flow", "flow": "needs"},
                {"action": "reply", "content": "still here"}
            ]),
            json!({}),
        )
        .await;
    let errors = report.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].kind, ErrorKind::FlowNotFound);
    assert_eq!(errors[1].kind, ErrorKind::RuntimeAction);
    assert_eq!(h.platform.sent_contents(), vec!["still here"]);
}

#[tokio::test]
async fn test_return_replaces_returns_expression() {
    let h = harness(json!({
        "flows": [{
            "name": "early",
            "actions": [
                {"action": "return", "value": "${args.x * 2}"},
                {"action": "reply", "content": "unreachable"}
            ],
            "returns": "0"
        }]
    }));
    let (_, ctx) = h
        .run(
            json!([{"action": "call_flow", "flow": "early", "args": {"x": 21}, "as": "out"}]),
            json!({}),
        )
        .await;
    assert_eq!(ctx.bindings.get("out"), Some(&Value::Integer(42)));
    assert!(h.platform.sent_contents().is_empty());
}

#[tokio::test]
async fn test_try_catch_finally() {
    let h = harness(json!({}));
    let (report, ctx) = h
        .run(
            json!([
                {"action": "try",
                 "do": [
                     {"action": "throw", "message": "boom"},
                     {"action": "reply", "content": "unreachable"}
                 ],
                 "catch": [{"action": "reply", "content": "caught ${error.message}"}],
                 "finally": [{"action": "log", "message": "cleanup"}]
                },
                {"action": "reply", "content": "after"}
            ]),
            json!({}),
        )
        .await;
    assert!(report.is_success());
    assert_eq!(h.platform.sent_contents(), vec!["caught boom", "after"]);
    assert_eq!(report.count("log"), 1);
    assert_eq!(report.errors()[0].kind, ErrorKind::Thrown);
    assert!(ctx.error.is_none());
}

#[tokio::test]
async fn test_leaf_failure_inside_try_is_caught() {
    let h = harness(json!({}));
    h.platform.fail_on("send_message");
    let (report, _) = h
        .run(
            json!([{"action": "try",
                "do": [
                    {"action": "send_message", "content": "x"},
                    {"action": "reply", "content": "unreachable"}
                ],
                "catch": [{"action": "reply", "content": "${error.kind}"}]
            }]),
            json!({}),
        )
        .await;
    assert!(report.is_success());
    assert_eq!(h.platform.sent_contents(), vec!["runtime_action"]);
}

#[tokio::test]
async fn test_uncaught_throw_ends_invocation() {
    let h = harness(json!({}));
    let (report, _) = h
        .run(
            json!([
                {"action": "throw", "message": "nope"},
                {"action": "reply", "content": "unreachable"}
            ]),
            json!({}),
        )
        .await;
    assert_eq!(report.error.as_ref().map(|e| e.kind), Some(ErrorKind::Thrown));
    assert!(h.platform.sent_contents().is_empty());
}

#[tokio::test]
async fn test_failure_policy_continue_and_fatal() {
    let h = harness(json!({}));
    h.platform.fail_on("send_message");
    let (report, _) = h
        .run(
            json!([
                {"action": "send_message", "content": "a"},
                {"action": "reply", "content": "continued"},
                {"action": "send_message", "content": "b", "fatal": true},
                {"action": "reply", "content": "unreachable"}
            ]),
            json!({}),
        )
        .await;
    assert_eq!(h.platform.sent_contents(), vec!["continued"]);
    assert_eq!(report.errors().len(), 2);
    assert!(report.error.is_some());
}

#[tokio::test]
async fn test_abort_unwinds_through_flows_and_runs_finally() {
    let h = harness(json!({
        "flows": [{"name": "stop", "actions": [{"action": "abort", "reason": "no ${args.what}"}]}]
    }));
    let (report, _) = h
        .run(
            json!([
                {"action": "try",
                 "do": [{"action": "call_flow", "flow": "stop", "args": {"what": "entry"}}],
                 "catch": [{"action": "reply", "content": "not an error"}],
                 "finally": [{"action": "reply", "content": "finally"}]
                },
                {"action": "reply", "content": "unreachable"}
            ]),
            json!({}),
        )
        .await;
    assert!(report.aborted);
    assert!(report.is_success());
    assert_eq!(report.abort_reason.as_deref(), Some("no entry"));
    assert_eq!(h.platform.sent_contents(), vec!["finally"]);
}

#[tokio::test]
async fn test_when_guard_skips() {
    let h = harness(json!({}));
    let (report, _) = h
        .run(
            json!([
                {"action": "reply", "content": "hidden", "when": "args.show"},
                {"action": "reply", "content": "shown", "when": "${!args.show}"}
            ]),
            json!({"show": false}),
        )
        .await;
    assert_eq!(h.platform.sent_contents(), vec!["shown"]);
    assert_eq!(report.count("reply"), 1);
    assert!(report.records[0].result.skipped);
}

#[tokio::test]
async fn test_declared_state_and_view() {
    let h = harness(json!({
        "state": {"variables": {
            "counter": {"scope": "guild", "default": 0},
            "queue": {"scope": "channel"}
        }}
    }));
    let (_, ctx) = h
        .run(
            json!([
                {"action": "increment", "var": "counter", "by": 2},
                {"action": "decrement", "var": "counter"},
                {"action": "list_push", "var": "queue", "value": "a"},
                {"action": "list_push", "var": "queue", "value": "b"},
                {"action": "list_remove", "var": "queue", "index": 0, "as": "removed"},
                {"action": "reply", "content": "${state.guild.counter} ${state.channel.queue[0]} ${removed}"}
            ]),
            json!({}),
        )
        .await;
    assert_eq!(h.platform.sent_contents(), vec!["1 b a"]);
    assert!(!ctx.bindings.contains("counter"));

    let scope = environment().scope_context();
    let state = h.executor.state();
    assert_eq!(state.get("counter", &scope).await.unwrap(), Value::Integer(1));
    assert_eq!(
        state.get("queue", &scope).await.unwrap(),
        Value::from(json!(["b"]))
    );
}

#[tokio::test]
async fn test_parallel_branches_share_state_not_bindings() {
    let h = harness(json!({
        "state": {"variables": {"hits": {"scope": "guild", "default": 0}}}
    }));
    let (report, ctx) = h
        .run(
            json!([
                {"action": "parallel", "actions": [
                    {"action": "increment", "var": "hits"},
                    {"action": "increment", "var": "hits"},
                    {"action": "set", "var": "local", "value": 1}
                ]},
                {"action": "reply", "content": "${state.guild.hits}"}
            ]),
            json!({}),
        )
        .await;
    assert!(report.is_success());
    assert_eq!(h.platform.sent_contents(), vec!["2"]);
    assert!(!ctx.bindings.contains("local"));
}

#[tokio::test]
async fn test_map_actions_reject_reserved_keys() {
    let h = harness(json!({}));
    let (report, ctx) = h
        .run(
            json!([
                {"action": "set_map", "var": "settings", "key": "lang", "value": "en"},
                {"action": "set_map", "var": "settings", "key": "__proto__", "value": "x"},
                {"action": "set", "var": "constructor", "value": 1}
            ]),
            json!({}),
        )
        .await;
    let kinds: Vec<_> = report.errors().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::SecurityRejection, ErrorKind::SecurityRejection]
    );
    assert_eq!(
        ctx.bindings.get("settings"),
        Some(&Value::from(json!({"lang": "en"})))
    );
}

#[tokio::test]
async fn test_timers_and_cancellation() {
    let h = harness(json!({}));
    let (report, _) = h
        .run(
            json!([
                {"action": "create_timer", "id": "t1", "delay": "1h", "event": "later", "as": "timer"},
                {"action": "cancel_timer", "id": "${timer}"},
                {"action": "cancel_timer", "id": "t1"},
                {"action": "create_timer", "delay": "soon", "event": "bad"}
            ]),
            json!({}),
        )
        .await;
    let kinds: Vec<_> = report.errors().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::TimerNotFound, ErrorKind::Evaluation]);
    assert_eq!(h.executor.timers().pending(), 0);
}

#[tokio::test]
async fn test_table_actions() {
    let h = harness(json!({
        "state": {"tables": {"warnings": {"columns": {
            "id": {"type": "integer", "primary": true},
            "user": {"type": "string"},
            "reason": {"type": "string", "default": "unspecified"}
        }}}}
    }));
    let (report, ctx) = h
        .run(
            json!([
                {"action": "db_insert", "table": "warnings", "row": {"user": "${user.id}", "reason": "spam"}},
                {"action": "db_insert", "table": "warnings", "row": {"user": "${user.id}"}},
                {"action": "db_insert", "table": "warnings", "row": {"user": "3"}},
                {"action": "db_query", "table": "warnings", "where": {"user": "9"}, "as": "rows"},
                {"action": "db_delete", "table": "warnings", "where": {"user": "3"}, "as": "deleted"},
                {"action": "db_query", "table": "bans"}
            ]),
            json!({}),
        )
        .await;
    let rows = ctx.bindings.get("rows").and_then(Value::as_list).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get_key("reason"), Some(&Value::from("unspecified")));
    assert_eq!(ctx.bindings.get("deleted"), Some(&Value::Integer(1)));
    assert_eq!(report.errors()[0].kind, ErrorKind::UnknownTable);
}

#[tokio::test]
async fn test_emit_publishes_custom_event() {
    let h = harness(json!({}));
    let mut rx = h.executor.events().subscribe();
    h.run(
        json!([{"action": "emit", "event": "level_up", "data": {"level": "${1 + 1}"}}]),
        json!({}),
    )
    .await;
    let event = rx.recv().await.unwrap();
    assert_eq!(event.name(), "level_up");
    assert_eq!(event.data.get_key("level"), Some(&Value::Integer(2)));
    assert_eq!(event.environment.user_id(), Some("9"));
}

#[test]
fn test_merge_branches_priority() {
    let merged = merge_branches(vec![
        ControlFlow::Return(Value::Null),
        ControlFlow::Fail(ActionError::runtime("x")),
        ControlFlow::Next,
    ]);
    assert!(matches!(merged, ControlFlow::Fail(_)));
    let merged = merge_branches(vec![
        ControlFlow::Fail(ActionError::runtime("x")),
        ControlFlow::Abort { reason: None },
    ]);
    assert!(matches!(merged, ControlFlow::Abort { .. }));
}
