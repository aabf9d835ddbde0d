// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;
use yare::parameterized;

fn ctx_with(
    parents: Vec<(&str, ParentResult)>,
    context: Vec<(&str, &str)>,
) -> (HashMap<String, ParentResult>, HashMap<String, String>) {
    (
        parents.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        context.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    )
}

fn check_parent(stdout: &str, exit_code: i64) -> ParentResult {
    ParentResult {
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: String::new(),
        state: "completed".to_string(),
    }
}

#[parameterized(
    includes_hit = { r#"parent.check.stdout.includes("version: 1.")"#, true },
    includes_miss = { r#"parent.check.stdout.includes("version: 3.")"#, false },
    negated = { r#"!parent.check.stdout.includes("version: 3.")"#, true },
    exit_code_eq = { "parent.check.exitCode == 0", true },
    exit_code_lt = { "parent.check.exitCode < 1", true },
    state_eq = { r#"parent.check.state == "completed""#, true },
    starts_with = { r#"parent.check.stdout.startsWith("version")"#, true },
    ends_with = { r#"parent.check.stdout.endsWith("1.9")"#, true },
    regex = { r#"parent.check.stdout.matches("version: [0-9]+")"#, true },
    and_both = { r#"parent.check.exitCode == 0 && parent.check.stdout.includes("1.")"#, true },
    and_short_circuit = { r#"parent.check.exitCode == 1 && parent.missing.stdout.includes("x")"#, false },
    or_first = { r#"parent.check.exitCode == 0 || parent.check.exitCode == 9"#, true },
    parens = { r#"!(parent.check.exitCode == 0 || false)"#, false },
    int_compare = { "parent.check.exitCode >= -1", true },
)]
fn evaluates(expr: &str, expected: bool) {
    let (parents, context) = ctx_with(vec![("check", check_parent("version: 1.9", 0))], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };
    assert_eq!(evaluate(expr, &ctx), expected, "expr: {expr}");
}

#[test]
fn workflow_context_lookup() {
    let (parents, context) = ctx_with(vec![], vec![("env", "staging")]);
    let ctx = ConditionContext { parents: &parents, context: &context };

    assert!(evaluate(r#"workflow.context.env == "staging""#, &ctx));
    assert!(!evaluate(r#"workflow.context.env == "prod""#, &ctx));
    // Missing keys are null, which is falsy and unequal to any string.
    assert!(!evaluate(r#"workflow.context.region == "eu""#, &ctx));
    assert!(evaluate("workflow.context.region == null", &ctx));
}

// Conditional skip: stdout "version: 2.0" routes to the
// skip_upgrade branch.
#[test]
fn version_gate_scenario() {
    let (parents, context) = ctx_with(vec![("check", check_parent("version: 2.0", 0))], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };

    assert!(!evaluate(r#"parent.check.stdout.includes("version: 1.")"#, &ctx));
    assert!(evaluate(r#"!parent.check.stdout.includes("version: 1.")"#, &ctx));
}

#[parameterized(
    unknown_root = { "system.load == 1" },
    unknown_field = { "parent.check.memory == 1" },
    unknown_parent = { "parent.nope.exitCode == 0" },
    unknown_method = { r#"parent.check.stdout.explode("x")"# },
    method_on_int = { r#"parent.check.exitCode.includes("0")"# },
    ordering_mixed_types = { r#"parent.check.exitCode < "1""# },
    unterminated_string = { r#"parent.check.stdout.includes("oops)"# },
    dangling_operator = { "parent.check.exitCode ==" },
    garbage = { "@@@" },
    bad_regex = { r#"parent.check.stdout.matches("(unclosed")"# },
)]
fn failures_evaluate_to_false(expr: &str) {
    let (parents, context) = ctx_with(vec![("check", check_parent("version: 1.9", 0))], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };
    assert!(!evaluate(expr, &ctx), "expr should fail safe: {expr}");
}

#[test]
fn null_exit_code_for_skipped_parent() {
    let parent = ParentResult {
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        state: "skipped".to_string(),
    };
    let (parents, context) = ctx_with(vec![("a", parent)], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };

    assert!(evaluate("parent.a.exitCode == null", &ctx));
    assert!(!evaluate("parent.a.exitCode == 0", &ctx));
    assert!(evaluate(r#"parent.a.state == "skipped""#, &ctx));
}

#[test]
fn oversized_expression_rejected() {
    let (parents, context) = ctx_with(vec![], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };
    let expr = format!("workflow.context.x == \"{}\"", "a".repeat(MAX_EXPR_LEN));
    assert_eq!(try_evaluate(&expr, &ctx), Err(ConditionError::TooLong));
}

#[test]
fn deep_nesting_rejected() {
    let (parents, context) = ctx_with(vec![], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };
    let expr = format!("{}true{}", "(".repeat(64), ")".repeat(64));
    assert_eq!(try_evaluate(&expr, &ctx), Err(ConditionError::TooDeep));
}

#[test]
fn mixed_type_equality_is_unequal_not_error() {
    let (parents, context) = ctx_with(vec![("check", check_parent("5", 5))], vec![]);
    let ctx = ConditionContext { parents: &parents, context: &context };
    // stdout is a string, 5 is an int: unequal, but not a failure.
    assert!(!evaluate("parent.check.stdout == 5", &ctx));
    assert!(evaluate("parent.check.stdout != 5", &ctx));
}
