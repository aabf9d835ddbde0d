// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive-descent parser for condition expressions.
//!
//! Grammar (loosest binding first):
//!
//! ```text
//! expr       := and ('||' and)*
//! and        := unary ('&&' unary)*
//! unary      := '!' unary | comparison
//! comparison := operand (('=='|'!='|'<'|'<='|'>'|'>=') operand)?
//! operand    := literal | path | path '.' method '(' args ')' | '(' expr ')'
//! path       := ident ('.' ident)*
//! ```

use super::eval::Value;
use super::token::Token;
use super::{ConditionError, MAX_DEPTH};

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted lookup, e.g. `parent.check.stdout`
    Path(Vec<String>),
    /// Method on a path's value, e.g. `parent.check.stdout.includes("x")`
    Call { path: Vec<String>, method: String, args: Vec<Expr> },
    Not(Box<Expr>),
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

pub fn parse(tokens: Vec<Token>) -> Result<Expr, ConditionError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ConditionError::UnexpectedToken {
            found: tok.to_string(),
            expected: "end of expression",
        }),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token, what: &'static str) -> Result<(), ConditionError> {
        match self.next() {
            Some(tok) if tok == *expected => Ok(()),
            Some(tok) => {
                Err(ConditionError::UnexpectedToken { found: tok.to_string(), expected: what })
            }
            None => Err(ConditionError::UnexpectedToken {
                found: "end of expression".into(),
                expected: what,
            }),
        }
    }

    fn check_depth(depth: usize) -> Result<(), ConditionError> {
        if depth >= MAX_DEPTH {
            return Err(ConditionError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self, depth: usize) -> Result<Expr, ConditionError> {
        Self::check_depth(depth)?;
        let mut lhs = self.and(depth + 1)?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.pos += 1;
            let rhs = self.and(depth + 1)?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn and(&mut self, depth: usize) -> Result<Expr, ConditionError> {
        Self::check_depth(depth)?;
        let mut lhs = self.unary(depth + 1)?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.pos += 1;
            let rhs = self.unary(depth + 1)?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self, depth: usize) -> Result<Expr, ConditionError> {
        Self::check_depth(depth)?;
        if matches!(self.peek(), Some(Token::Not)) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary(depth + 1)?)));
        }
        self.comparison(depth + 1)
    }

    fn comparison(&mut self, depth: usize) -> Result<Expr, ConditionError> {
        Self::check_depth(depth)?;
        let lhs = self.operand(depth + 1)?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.operand(depth + 1)?;
        Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn operand(&mut self, depth: usize) -> Result<Expr, ConditionError> {
        Self::check_depth(depth)?;
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.expr(depth + 1)?;
                self.eat(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(first)) => self.path_or_call(first, depth),
            Some(tok) => Err(ConditionError::UnexpectedToken {
                found: tok.to_string(),
                expected: "literal, path, or '('",
            }),
            None => Err(ConditionError::UnexpectedToken {
                found: "end of expression".into(),
                expected: "literal, path, or '('",
            }),
        }
    }

    fn path_or_call(&mut self, first: String, depth: usize) -> Result<Expr, ConditionError> {
        let mut segments = vec![first];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(seg)) => {
                    // A segment followed by '(' is a method call on the
                    // value of the preceding path.
                    if matches!(self.peek(), Some(Token::LParen)) {
                        self.pos += 1;
                        let args = self.args(depth + 1)?;
                        return Ok(Expr::Call { path: segments, method: seg, args });
                    }
                    segments.push(seg);
                }
                Some(tok) => {
                    return Err(ConditionError::UnexpectedToken {
                        found: tok.to_string(),
                        expected: "identifier after '.'",
                    })
                }
                None => {
                    return Err(ConditionError::UnexpectedToken {
                        found: "end of expression".into(),
                        expected: "identifier after '.'",
                    })
                }
            }
        }
        Ok(Expr::Path(segments))
    }

    fn args(&mut self, depth: usize) -> Result<Vec<Expr>, ConditionError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr(depth + 1)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(tok) => {
                    return Err(ConditionError::UnexpectedToken {
                        found: tok.to_string(),
                        expected: "',' or ')'",
                    })
                }
                None => {
                    return Err(ConditionError::UnexpectedToken {
                        found: "end of expression".into(),
                        expected: "',' or ')'",
                    })
                }
            }
        }
    }
}
