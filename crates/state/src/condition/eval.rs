// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Evaluator for parsed condition expressions.

use super::parser::{BinaryOp, Expr};
use super::{ConditionContext, ConditionError, MAX_DEPTH};
use regex::RegexBuilder;
use std::time::Instant;

/// Regex compilation ceiling; a pathological pattern fails, not stalls.
const REGEX_SIZE_LIMIT: usize = 1 << 16;

/// The value bag conditions operate on.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// JS-style truthiness: the source workflows were written against it.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
        }
    }
}

/// Captured outcome of one terminal parent task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParentResult {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    /// Terminal state name ("completed", "skipped", ...)
    pub state: String,
}

pub(super) fn eval(
    expr: &Expr,
    ctx: &ConditionContext,
    deadline: Instant,
    depth: usize,
) -> Result<Value, ConditionError> {
    if depth >= MAX_DEPTH {
        return Err(ConditionError::TooDeep);
    }
    if Instant::now() > deadline {
        return Err(ConditionError::Timeout);
    }
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segments) => resolve_path(segments, ctx),
        Expr::Call { path, method, args } => {
            let receiver = resolve_path(path, ctx)?;
            let args: Vec<Value> = args
                .iter()
                .map(|a| eval(a, ctx, deadline, depth + 1))
                .collect::<Result<_, _>>()?;
            call_method(&receiver, method, &args)
        }
        Expr::Not(inner) => {
            let v = eval(inner, ctx, deadline, depth + 1)?;
            Ok(Value::Bool(!v.truthy()))
        }
        Expr::Binary { op: BinaryOp::And, lhs, rhs } => {
            if !eval(lhs, ctx, deadline, depth + 1)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(rhs, ctx, deadline, depth + 1)?.truthy()))
        }
        Expr::Binary { op: BinaryOp::Or, lhs, rhs } => {
            if eval(lhs, ctx, deadline, depth + 1)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(rhs, ctx, deadline, depth + 1)?.truthy()))
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, ctx, deadline, depth + 1)?;
            let rhs = eval(rhs, ctx, deadline, depth + 1)?;
            compare(op, &lhs, &rhs)
        }
    }
}

/// `parent.<key>.{exitCode,stdout,stderr,state}` or `workflow.context.<key>`.
fn resolve_path(segments: &[String], ctx: &ConditionContext) -> Result<Value, ConditionError> {
    let joined = || segments.join(".");
    match segments {
        [root, key, field] if root == "parent" => {
            let Some(parent) = ctx.parents.get(key) else {
                return Err(ConditionError::UnknownPath(joined()));
            };
            match field.as_str() {
                "exitCode" => Ok(parent.exit_code.map(Value::Int).unwrap_or(Value::Null)),
                "stdout" => Ok(Value::Str(parent.stdout.clone())),
                "stderr" => Ok(Value::Str(parent.stderr.clone())),
                "state" => Ok(Value::Str(parent.state.clone())),
                _ => Err(ConditionError::UnknownPath(joined())),
            }
        }
        [root, ctx_kw, key] if root == "workflow" && ctx_kw == "context" => Ok(ctx
            .context
            .get(key)
            .map(|v| Value::Str(v.clone()))
            .unwrap_or(Value::Null)),
        _ => Err(ConditionError::UnknownPath(joined())),
    }
}

fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, ConditionError> {
    let Value::Str(s) = receiver else {
        return Err(ConditionError::TypeMismatch(format!(
            "method {method}() needs a string receiver, got {}",
            receiver.type_name()
        )));
    };
    let needle = match args {
        [Value::Str(arg)] => arg,
        _ => {
            return Err(ConditionError::TypeMismatch(format!(
                "method {method}() takes one string argument"
            )))
        }
    };
    match method {
        "includes" => Ok(Value::Bool(s.contains(needle.as_str()))),
        "startsWith" => Ok(Value::Bool(s.starts_with(needle.as_str()))),
        "endsWith" => Ok(Value::Bool(s.ends_with(needle.as_str()))),
        "matches" => {
            let re = RegexBuilder::new(needle)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| ConditionError::BadRegex(e.to_string()))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        other => Err(ConditionError::UnknownMethod(other.to_string())),
    }
}

fn compare(op: &BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ConditionError> {
    use std::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        // Mixed types: only equality comparisons make sense, and they
        // are simply unequal.
        _ => None,
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(ordering == Some(Ordering::Equal))),
        BinaryOp::Ne => Ok(Value::Bool(ordering != Some(Ordering::Equal))),
        _ => {
            let Some(ordering) = ordering else {
                return Err(ConditionError::TypeMismatch(format!(
                    "cannot order {} against {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => unreachable!("handled above"),
            };
            Ok(Value::Bool(result))
        }
    }
}
