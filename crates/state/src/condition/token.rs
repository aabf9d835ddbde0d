// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokens for the condition lexer.

use super::ConditionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    True,
    False,
    Null,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Not,
    /// `==`
    EqEq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    LParen,
    RParen,
    Dot,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier {s:?}"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Int(n) => write!(f, "integer {n}"),
            Token::True => f.write_str("'true'"),
            Token::False => f.write_str("'false'"),
            Token::Null => f.write_str("'null'"),
            Token::AndAnd => f.write_str("'&&'"),
            Token::OrOr => f.write_str("'||'"),
            Token::Not => f.write_str("'!'"),
            Token::EqEq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Lt => f.write_str("'<'"),
            Token::Le => f.write_str("'<='"),
            Token::Gt => f.write_str("'>'"),
            Token::Ge => f.write_str("'>='"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Dot => f.write_str("'.'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Tokenize an expression. Strings accept single or double quotes with
/// `\\`, `\'`, `\"`, `\n`, `\t` escapes.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '&' if matches!(chars.get(i + 1), Some((_, '&'))) => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if matches!(chars.get(i + 1), Some((_, '|'))) => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '=' if matches!(chars.get(i + 1), Some((_, '='))) => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '!' if matches!(chars.get(i + 1), Some((_, '='))) => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if matches!(chars.get(i + 1), Some((_, '='))) => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if matches!(chars.get(i + 1), Some((_, '='))) => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(ConditionError::UnterminatedString(pos)),
                        Some((_, ch)) if *ch == quote => {
                            j += 1;
                            break;
                        }
                        Some((_, '\\')) => match chars.get(j + 1) {
                            Some((_, 'n')) => {
                                value.push('\n');
                                j += 2;
                            }
                            Some((_, 't')) => {
                                value.push('\t');
                                j += 2;
                            }
                            Some((_, esc)) => {
                                value.push(*esc);
                                j += 2;
                            }
                            None => return Err(ConditionError::UnterminatedString(pos)),
                        },
                        Some((_, ch)) => {
                            value.push(*ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
                i = j;
            }
            '-' if matches!(chars.get(i + 1), Some((_, d)) if d.is_ascii_digit()) => {
                let (consumed, n) = lex_int(&chars[i + 1..], true)?;
                tokens.push(Token::Int(n));
                i += 1 + consumed;
            }
            c if c.is_ascii_digit() => {
                let (consumed, n) = lex_int(&chars[i..], false)?;
                tokens.push(Token::Int(n));
                i += consumed;
            }
            c if is_ident_start(c) => {
                let mut word = String::new();
                let mut j = i;
                while let Some((_, ch)) = chars.get(j) {
                    if is_ident_continue(*ch) {
                        word.push(*ch);
                        j += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
                i = j;
            }
            other => return Err(ConditionError::UnexpectedChar(other, pos)),
        }
    }
    Ok(tokens)
}

fn lex_int(chars: &[(usize, char)], negative: bool) -> Result<(usize, i64), ConditionError> {
    let mut value: i64 = 0;
    let mut consumed = 0;
    for (_, c) in chars {
        let Some(digit) = c.to_digit(10) else { break };
        value = value.saturating_mul(10).saturating_add(digit as i64);
        consumed += 1;
    }
    Ok((consumed, if negative { -value } else { value }))
}
