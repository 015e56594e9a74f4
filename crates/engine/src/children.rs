//! Deterministic ordering and page-slicing for table children.
//!
//! The IDE fetches table contents lazily and in pages. Ordering must be
//! stable across fetches of the same snapshot, so keys are sorted up front:
//! numeric keys before string keys, each class ordered by the canonical
//! string form of the key.

use crate::value::{RValue, TableKey, TableSnapshot, Variable};

/// Marker appended to a non-terminal page; expanding it fetches the next
/// page starting at `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    pub base_expression: String,
    pub from: usize,
}

/// One page of children, plus a continuation when more remain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildPage {
    pub children: Vec<Variable>,
    pub continuation: Option<Continuation>,
}

/// Sort a snapshot's keys: numeric class first, then everything else,
/// each class ordered by canonical string form.
pub fn sorted_keys(snapshot: &TableSnapshot) -> Vec<TableKey> {
    let mut keys: Vec<TableKey> = snapshot.entries.iter().map(|(k, _)| k.clone()).collect();
    keys.sort_by(|a, b| {
        let class = |k: &TableKey| if k.is_numeric() { 0u8 } else { 1u8 };
        class(a)
            .cmp(&class(b))
            .then_with(|| a.canonical().cmp(&b.canonical()))
    });
    keys
}

/// Children left beyond the slice end.
pub fn remaining(total: usize, to: usize) -> usize {
    total.saturating_sub(to)
}

/// Build the `[from, to)` page over pre-sorted keys. Each child pairs the
/// snapshot value with a re-evaluable expression derived from `base_expr`.
pub fn build_slice(
    base_expr: &str,
    snapshot: &TableSnapshot,
    keys: &[TableKey],
    from: usize,
    to: usize,
) -> ChildPage {
    let to = to.min(keys.len());
    let from = from.min(to);

    let mut children = Vec::with_capacity(to - from);
    for key in &keys[from..to] {
        let value = match snapshot.get(key) {
            Some(v) => v.clone(),
            None => RValue::Nil,
        };
        children.push(Variable {
            name: key.canonical(),
            value,
            expression: child_expression(base_expr, key),
        });
    }

    let continuation = if remaining(keys.len(), to) > 0 {
        Some(Continuation {
            base_expression: base_expr.to_string(),
            from: to,
        })
    } else {
        None
    };

    ChildPage {
        children,
        continuation,
    }
}

/// Derive the child expression: `base.key` for identifier-shaped string
/// keys, `base[n]` for numeric keys, `base["escaped"]` otherwise.
pub fn child_expression(base: &str, key: &TableKey) -> String {
    match key {
        TableKey::Num(n) => format!("{}[{}]", base, crate::value::format_number(*n)),
        TableKey::Str(s) if is_identifier(s) => format!("{}.{}", base, s),
        other => format!("{}[\"{}\"]", base, escape_key(&other.canonical())),
    }
}

/// Lua identifier shape, excluding reserved words (`t.end` is not valid).
fn is_identifier(s: &str) -> bool {
    const RESERVED: &[&str] = &[
        "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
        "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
    ];
    let mut chars = s.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    head_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&s)
}

fn escape_key(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
