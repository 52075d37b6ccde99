// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal condition language for workflow steps.
//!
//! Grammar (deliberately small — nothing from YAML is ever evaluated as a
//! general expression):
//!
//! ```text
//! expr    := or
//! or      := and ( OR and )*
//! and     := unary ( AND unary )*
//! unary   := NOT unary | primary
//! primary := '(' expr ')' | 'true' | 'false' | <stepId> '.success'
//! ```
//!
//! A reference to a step that has no result, failed, or was skipped
//! evaluates to false.

use std::collections::BTreeMap;

use crate::{StepResult, WorkflowError};

/// Evaluate a condition expression against accumulated step results.
pub fn evaluate_condition(
    expr: &str,
    results: &BTreeMap<String, StepResult>,
) -> Result<bool, WorkflowError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0, results };
    let value = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(WorkflowError::Validation(format!(
            "condition '{expr}': unexpected trailing tokens"
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    And,
    Or,
    Not,
    True,
    False,
    Open,
    Close,
    /// `<stepId>.success`
    StepSuccess(String),
}

fn tokenize(expr: &str) -> Result<Vec<Token>, WorkflowError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => match word.strip_suffix(".success") {
                        Some(step_id) if !step_id.is_empty() => {
                            Token::StepSuccess(step_id.to_string())
                        }
                        _ => {
                            return Err(WorkflowError::Validation(format!(
                                "condition: unknown token '{word}' \
                                 (expected <stepId>.success, true, false, AND, OR, NOT)"
                            )))
                        }
                    },
                });
            }
            other => {
                return Err(WorkflowError::Validation(format!(
                    "condition: unexpected character '{other}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    results: &'a BTreeMap<String, StepResult>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<bool, WorkflowError> {
        let mut value = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn parse_and(&mut self) -> Result<bool, WorkflowError> {
        let mut value = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn parse_unary(&mut self) -> Result<bool, WorkflowError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(!self.parse_unary()?);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<bool, WorkflowError> {
        match self.advance() {
            Some(Token::True) => Ok(true),
            Some(Token::False) => Ok(false),
            Some(Token::StepSuccess(id)) => Ok(self
                .results
                .get(&id)
                .map(|r| r.success && !r.skipped)
                .unwrap_or(false)),
            Some(Token::Open) => {
                let value = self.parse_or()?;
                match self.advance() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(WorkflowError::Validation(
                        "condition: missing closing parenthesis".into(),
                    )),
                }
            }
            other => Err(WorkflowError::Validation(format!(
                "condition: unexpected token {other:?}"
            ))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
