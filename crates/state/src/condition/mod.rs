// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandboxed edge-condition expressions.
//!
//! A restricted boolean/string predicate language over the parent-results
//! map and the workflow context:
//!
//! ```text
//! parent.check.exitCode == 0 && parent.check.stdout.includes("version: 1.")
//! workflow.context.env != "prod" || parent.build.state == "completed"
//! ```
//!
//! No loops, no side effects, no external references. Anything that goes
//! wrong (lex, parse, unknown path, type mismatch, regex blowup, budget
//! exhausted) evaluates to `false` with a warning, never a crash.

mod eval;
mod parser;
mod token;

pub use eval::{ParentResult, Value};
pub use parser::Expr;

use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Hard ceiling on expression source length.
pub const MAX_EXPR_LEN: usize = 4096;
/// Hard ceiling on parse/eval nesting.
pub const MAX_DEPTH: usize = 32;
/// Wall-clock budget for one evaluation.
pub const EVAL_BUDGET: Duration = Duration::from_millis(100);

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("expression longer than {MAX_EXPR_LEN} bytes")]
    TooLong,
    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },
    #[error("expression nested deeper than {MAX_DEPTH}")]
    TooDeep,
    #[error("unknown path: {0}")]
    UnknownPath(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("invalid regex: {0}")]
    BadRegex(String),
    #[error("evaluation exceeded {}ms budget", EVAL_BUDGET.as_millis())]
    Timeout,
}

/// Inputs visible to an expression.
pub struct ConditionContext<'a> {
    /// Terminal parents keyed by task key.
    pub parents: &'a HashMap<String, ParentResult>,
    /// `workflow.context.<key>` values.
    pub context: &'a HashMap<String, String>,
}

/// Evaluate an expression to a boolean, failing safe to `false`.
pub fn evaluate(expr: &str, ctx: &ConditionContext) -> bool {
    match try_evaluate(expr, ctx) {
        Ok(truthy) => truthy,
        Err(e) => {
            warn!(expr, error = %e, "condition failed to evaluate, treating as false");
            false
        }
    }
}

/// Evaluate an expression, surfacing the failure reason.
pub fn try_evaluate(expr: &str, ctx: &ConditionContext) -> Result<bool, ConditionError> {
    if expr.len() > MAX_EXPR_LEN {
        return Err(ConditionError::TooLong);
    }
    let tokens = token::tokenize(expr)?;
    let ast = parser::parse(tokens)?;
    let deadline = Instant::now() + EVAL_BUDGET;
    let value = eval::eval(&ast, ctx, deadline, 0)?;
    Ok(value.truthy())
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
