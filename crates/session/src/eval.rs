//! Remote expression evaluation.
//!
//! Expressions run through `EXEC return <expr>` scoped to a frame, with the
//! serialization depth capped so huge tables cannot flood the wire. Results
//! come back as serialized text and are reconstructed into [`RValue`]s;
//! anything unreconstructable surfaces a synthesized "Failed to evaluate"
//! error instead of tearing the session down.

use std::sync::{Arc, Mutex};

use luascope_engine::{dump, userdata, RValue};
use luascope_protocol::Command;

use crate::dispatch::Dispatcher;

type ErrorSlot = Arc<Mutex<Option<Box<dyn FnOnce(EvalError) + Send>>>>;

/// Invoke the shared error callback if it has not fired yet.
fn fire_error(slot: &ErrorSlot, error: EvalError) {
    if let Some(callback) = slot.lock().unwrap().take() {
        callback(error);
    }
}

/// Error surfaced through an evaluation's error callback. `details` falls
/// back to the summary when the remote sent no body.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
    pub details: String,
}

/// A successful evaluation: a single value, or the positional list a
/// vararg expression produces.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Value(RValue),
    Varargs(Vec<RValue>),
}

pub struct Evaluator {
    dispatcher: Arc<Dispatcher>,
    max_depth: u32,
}

impl Evaluator {
    pub fn new(dispatcher: Arc<Dispatcher>, max_depth: u32) -> Self {
        Self {
            dispatcher,
            max_depth,
        }
    }

    /// Evaluate an expression in a frame's context. `"..."` reconstructs
    /// the whole vararg list; everything else yields a single value.
    pub fn evaluate(
        &self,
        frame: Option<u32>,
        expr: &str,
        on_result: impl FnOnce(EvalResult) + Send + 'static,
        on_error: impl FnOnce(EvalError) + Send + 'static,
    ) {
        let expr = expr.trim().to_string();
        let is_varargs = expr == "...";
        let command = Command::Exec {
            code: format!("return {}", expr),
            frame,
            options: Some(format!("maxlevel = {}", self.max_depth)),
        };

        // The error callback can fire from the success path too (when the
        // body does not reconstruct), so it lives in a shared one-shot slot.
        let on_error: ErrorSlot = Arc::new(Mutex::new(Some(Box::new(on_error))));
        let on_error_remote = on_error.clone();

        self.dispatcher.send(
            command,
            move |message| {
                let body = message.unwrap_or_default();
                if is_varargs {
                    let values: Vec<RValue> = split_values(&body)
                        .iter()
                        .filter_map(|part| reconstruct(part))
                        .collect();
                    on_result(EvalResult::Varargs(values));
                    return;
                }
                match reconstruct(&body) {
                    Some(value) => on_result(EvalResult::Value(value)),
                    None => fire_error(
                        &on_error,
                        EvalError {
                            message: "Failed to evaluate".to_string(),
                            details: body,
                        },
                    ),
                }
            },
            move |e| {
                let details = e.details.unwrap_or_else(|| e.message.clone());
                fire_error(
                    &on_error_remote,
                    EvalError {
                        message: e.message,
                        details,
                    },
                );
            },
        );
    }

    /// Execute a statement in a frame's context. Success carries no value,
    /// whatever the reply body says.
    pub fn execute_statement(
        &self,
        frame: Option<u32>,
        statement: &str,
        on_done: impl FnOnce() + Send + 'static,
        on_error: impl FnOnce(EvalError) + Send + 'static,
    ) {
        let command = Command::Exec {
            code: statement.trim().to_string(),
            frame,
            options: None,
        };
        self.dispatcher.send(
            command,
            move |_| on_done(),
            move |e| {
                let details = e.details.unwrap_or_else(|| e.message.clone());
                on_error(EvalError {
                    message: e.message,
                    details,
                });
            },
        );
    }
}

/// Rebuild a value from its serialized text form.
///
/// Returns `None` for an empty body or an unparsable table literal; the
/// caller turns that into a synthesized error.
pub fn reconstruct(text: &str) -> Option<RValue> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text == "nil" {
        return Some(RValue::Nil);
    }
    if text == "true" {
        return Some(RValue::Bool(true));
    }
    if text == "false" {
        return Some(RValue::Bool(false));
    }
    if let Ok(n) = text.parse::<f64>() {
        return Some(RValue::Num(n));
    }
    if let Some(structured) = userdata::parse_description(text) {
        return Some(structured);
    }
    if text.starts_with('{') {
        return dump::parse_table_literal(text);
    }
    if let Some(inner) = unquote(text) {
        return Some(RValue::Str(inner));
    }
    // Opaque serializations ("function: 0x...", "thread: 0x...").
    if text.starts_with("function:") {
        return Some(RValue::Func(text.to_string()));
    }
    if text.starts_with("thread:") {
        return Some(RValue::Thread(text.to_string()));
    }
    Some(RValue::Str(text.to_string()))
}

/// Split a comma-joined multi-value result at depth zero, respecting
/// strings and bracket nesting.
pub fn split_values(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '{' | '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' | ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Strip matching quotes and undo the serializer's escapes.
fn unquote(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let quote = bytes[0];
    if (quote != b'"' && quote != b'\'') || bytes[bytes.len() - 1] != quote {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}
