//! The runtime value model.
//!
//! Every value the remote interpreter reports is classified into the closed
//! [`RValue`] variant set. Consumers match exhaustively: adding a variant is
//! a deliberate, compiler-enforced change everywhere values are shown.

use mlua::Value;

use crate::userdata;

/// Icon hint for the IDE's variable tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueIcon {
    Primitive,
    Text,
    Table,
    Function,
    Structured,
    Opaque,
}

/// Key of a table entry, normalized for ordering and child expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum TableKey {
    Num(f64),
    Str(String),
    /// Non-string, non-numeric keys (booleans, tables, ...) carried by
    /// their display form.
    Other(String),
}

impl TableKey {
    /// Canonical string form used for ordering and display.
    pub fn canonical(&self) -> String {
        match self {
            TableKey::Num(n) => format_number(*n),
            TableKey::Str(s) => s.clone(),
            TableKey::Other(s) => s.clone(),
        }
    }

    /// Numeric keys sort before everything else.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TableKey::Num(_))
    }
}

/// Parsed content of a table value, kept for children browsing. Entry
/// order is the interpreter's iteration order; the pager re-sorts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSnapshot {
    pub entries: Vec<(TableKey, RValue)>,
}

impl TableSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &TableKey) -> Option<&RValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// A named value visible in some frame, with the expression that
/// re-evaluates it (used for lazy child fetch).
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: RValue,
    pub expression: String,
}

/// The closed set of runtime value variants.
///
/// Structured userdata variants (`Hash`, `Url`, `Message`, `Vector`, `Quat`,
/// `Matrix`) are recovered from the interpreter's textual description by the
/// ordered parsers in [`crate::userdata`]; anything unrecognized stays a
/// generic `Userdata`.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    Nil,
    Bool(bool),
    Num(f64),
    Str(String),
    Table {
        content: String,
        snapshot: Option<TableSnapshot>,
    },
    Func(String),
    Userdata(String),
    Thread(String),
    Hash(String),
    Url {
        socket: String,
        path: Option<String>,
        fragment: Option<String>,
    },
    Message(String),
    Vector(Vec<f64>),
    Quat([f64; 4]),
    Matrix(Box<[f64; 16]>),
    Unknown(String),
}

impl RValue {
    /// One-line preview shown next to the variable name.
    pub fn preview(&self) -> String {
        match self {
            RValue::Nil => "nil".to_string(),
            RValue::Bool(b) => b.to_string(),
            RValue::Num(n) => format_number(*n),
            RValue::Str(s) => format!("\"{}\"", s),
            RValue::Table { content, .. } => content.clone(),
            RValue::Func(desc) => desc.clone(),
            RValue::Userdata(desc) => desc.clone(),
            RValue::Thread(desc) => desc.clone(),
            RValue::Hash(value) => format!("hash: [{}]", value),
            RValue::Url {
                socket,
                path,
                fragment,
            } => {
                let mut s = format!("url: [{}", socket);
                if let Some(p) = path {
                    s.push(':');
                    s.push_str(p);
                }
                if let Some(f) = fragment {
                    s.push('#');
                    s.push_str(f);
                }
                s.push(']');
                s
            }
            RValue::Message(id) => format!("msg: [{}]", id),
            RValue::Vector(components) => format!(
                "vmath.vector{}({})",
                components.len(),
                join_numbers(components)
            ),
            RValue::Quat(c) => format!("vmath.quat({})", join_numbers(c)),
            RValue::Matrix(c) => format!("vmath.matrix4({})", join_numbers(c.as_slice())),
            RValue::Unknown(raw) => raw.clone(),
        }
    }

    /// Type label for the variable tree, when one is meaningful.
    pub fn type_label(&self) -> Option<&'static str> {
        match self {
            RValue::Nil => None,
            RValue::Bool(_) => Some("boolean"),
            RValue::Num(_) => Some("number"),
            RValue::Str(_) => Some("string"),
            RValue::Table { .. } => Some("table"),
            RValue::Func(_) => Some("function"),
            RValue::Userdata(_) => Some("userdata"),
            RValue::Thread(_) => Some("thread"),
            RValue::Hash(_) => Some("hash"),
            RValue::Url { .. } => Some("url"),
            RValue::Message(_) => Some("message"),
            RValue::Vector(c) => match c.len() {
                2 => Some("vector2"),
                3 => Some("vector3"),
                _ => Some("vector4"),
            },
            RValue::Quat(_) => Some("quat"),
            RValue::Matrix(_) => Some("matrix4"),
            RValue::Unknown(_) => None,
        }
    }

    pub fn icon(&self) -> ValueIcon {
        match self {
            RValue::Nil | RValue::Bool(_) | RValue::Num(_) => ValueIcon::Primitive,
            RValue::Str(_) => ValueIcon::Text,
            RValue::Table { .. } => ValueIcon::Table,
            RValue::Func(_) => ValueIcon::Function,
            RValue::Hash(_)
            | RValue::Url { .. }
            | RValue::Message(_)
            | RValue::Vector(_)
            | RValue::Quat(_)
            | RValue::Matrix(_) => ValueIcon::Structured,
            RValue::Userdata(_) | RValue::Thread(_) | RValue::Unknown(_) => ValueIcon::Opaque,
        }
    }

    /// Whether the IDE should offer expansion. Only tables page children.
    pub fn has_children(&self) -> bool {
        matches!(self, RValue::Table { .. })
    }

    /// Classify a dump entry. Dump payloads describe each variable as a
    /// 2-element tuple `(raw_value, description)`; anything else falls back
    /// to self-describing classification.
    pub fn from_entry(entry: &Value) -> RValue {
        if let Value::Table(t) = entry {
            if t.raw_len() == 2 {
                let raw: Value = t.get(1).unwrap_or(Value::Nil);
                let desc: Option<String> = t
                    .get::<Value>(2)
                    .ok()
                    .and_then(|v| lua_to_owned_string(&v));
                return classify(&raw, desc.as_deref());
            }
        }
        RValue::from_raw(entry)
    }

    /// Classify a bare value with no separate description.
    pub fn from_raw(value: &Value) -> RValue {
        classify(value, None)
    }
}

/// Classification core shared by `from_entry`/`from_raw`.
fn classify(raw: &Value, description: Option<&str>) -> RValue {
    match raw {
        Value::Nil => RValue::Nil,
        Value::Boolean(b) => RValue::Bool(*b),
        Value::Integer(i) => RValue::Num(*i as f64),
        Value::Number(n) => RValue::Num(*n),
        Value::String(s) => {
            let text = s
                .to_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "<invalid utf8>".to_string());
            // A string description may actually be a structured userdata
            // rendering that round-tripped through the serializer.
            let probe = description.unwrap_or(&text);
            match userdata::parse_description(probe) {
                Some(structured) => structured,
                None => RValue::Str(text),
            }
        }
        Value::Table(t) => {
            let snapshot = snapshot_table(t);
            let content = description
                .map(|d| d.to_string())
                .unwrap_or_else(|| "table".to_string());
            RValue::Table {
                content,
                snapshot: Some(snapshot),
            }
        }
        Value::Function(_) => RValue::Func(
            description
                .map(|d| d.to_string())
                .unwrap_or_else(|| "function".to_string()),
        ),
        Value::Thread(_) => RValue::Thread(
            description
                .map(|d| d.to_string())
                .unwrap_or_else(|| "thread".to_string()),
        ),
        Value::UserData(_) | Value::LightUserData(_) => {
            let desc = description.unwrap_or("userdata");
            match userdata::parse_description(desc) {
                Some(structured) => structured,
                None => RValue::Userdata(desc.to_string()),
            }
        }
        other => RValue::Unknown(lua_display(other)),
    }
}

/// Walk a Lua table into a snapshot of (key, value) entries.
fn snapshot_table(table: &mlua::Table) -> TableSnapshot {
    let mut entries = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = match pair {
            Ok(kv) => kv,
            Err(_) => continue,
        };
        let key = match &key {
            Value::Integer(i) => TableKey::Num(*i as f64),
            Value::Number(n) => TableKey::Num(*n),
            Value::String(s) => TableKey::Str(
                s.to_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<invalid utf8>".to_string()),
            ),
            other => TableKey::Other(lua_display(other)),
        };
        entries.push((key, RValue::from_raw(&value)));
    }
    TableSnapshot { entries }
}

/// Display form for a Lua value, matching the interpreter's conventions.
pub(crate) fn lua_display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s
            .to_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "<invalid utf8>".to_string()),
        Value::Table(_) => "table".to_string(),
        Value::Function(_) => "function".to_string(),
        Value::Thread(_) => "thread".to_string(),
        Value::UserData(_) => "userdata".to_string(),
        Value::LightUserData(_) => "lightuserdata".to_string(),
        Value::Error(e) => format!("error: {}", e),
        _ => "<unknown>".to_string(),
    }
}

/// Extract an owned string from a Lua string value, if it is one.
fn lua_to_owned_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(
            s.to_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "<invalid utf8>".to_string()),
        ),
        _ => None,
    }
}

/// Format a number without trailing zeros for integral values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn join_numbers(components: &[f64]) -> String {
    components
        .iter()
        .map(|c| format_number(*c))
        .collect::<Vec<_>>()
        .join(", ")
}
