mod common;

use flowbot::expression::pattern::{compile_pattern, PatternError};
use flowbot::expression::{EmptyScope, ExpressionEvaluator};
use flowbot::Value;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

#[test]
fn test_rejected_patterns_fall_back_to_literal_matching() {
    assert_eq!(
        compile_pattern("(a+)+$", false).unwrap_err(),
        PatternError::NestedQuantifier
    );
    assert_eq!(
        compile_pattern("(a|aa)*", false).unwrap_err(),
        PatternError::QuantifiedAlternation
    );

    let evaluator = ExpressionEvaluator::new();
    let scope = common::map(json!({"text": "aaaa(a+)+$"}));
    assert_eq!(
        evaluator.evaluate("test(text, '(a+)+$')", &scope).unwrap(),
        Value::Boolean(true)
    );
    assert_eq!(
        evaluator.evaluate("replace(text, '(a+)+$', '!')", &scope).unwrap(),
        Value::from("aaaa!")
    );
    assert_eq!(
        evaluator.evaluate("test('aaaa', '(a+)+$')", &EmptyScope).unwrap(),
        Value::Boolean(false)
    );
}

#[test]
fn test_templates_keep_types_of_single_spans() {
    let evaluator = ExpressionEvaluator::new();
    let scope = common::map(json!({"args": {"a": 5, "b": 3}, "user": {"name": "ann"}}));
    assert_eq!(
        evaluator.resolve("${args.a + args.b}", &scope).unwrap(),
        Value::Integer(8)
    );
    assert_eq!(
        evaluator.interpolate("hi ${user.name}, ${args.a * 2}", &scope).unwrap(),
        "hi ann, 10"
    );
}

proptest! {
    #[test]
    fn text_without_spans_is_unchanged(text in "[^$]*") {
        let evaluator = ExpressionEvaluator::new();
        prop_assert_eq!(evaluator.interpolate(&text, &EmptyScope).unwrap(), text);
    }

    #[test]
    fn dollar_without_brace_is_unchanged(text in "[a-z $]{0,40}") {
        prop_assume!(!text.contains("${"));
        let evaluator = ExpressionEvaluator::new();
        prop_assert_eq!(evaluator.interpolate(&text, &EmptyScope).unwrap(), text);
    }
}
