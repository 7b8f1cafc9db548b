#![allow(dead_code)]

use std::sync::Arc;

use flowbot::event::Environment;
use flowbot::platform::RecordingPlatform;
use flowbot::spec::Specification;
use flowbot::{Runtime, Value, ValueMap};
use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn spec(value: serde_json::Value) -> Specification {
    serde_json::from_value(value).expect("valid specification")
}

pub fn map(value: serde_json::Value) -> ValueMap {
    match Value::from(value) {
        Value::Map(map) => map,
        other => panic!("expected a map, got {:?}", other),
    }
}

pub fn environment() -> Environment {
    serde_json::from_value(serde_json::json!({
        "user": {"id": "9", "name": "ann"},
        "member": {"roles": ["member"]},
        "guild": {"id": "42"},
        "channel": {"id": "7"}
    }))
    .expect("valid environment")
}

pub async fn runtime(value: serde_json::Value) -> (Runtime, Arc<RecordingPlatform>) {
    let platform = Arc::new(RecordingPlatform::new());
    let runtime = Runtime::in_memory(spec(value), platform.clone())
        .await
        .expect("runtime builds");
    (runtime, platform)
}
