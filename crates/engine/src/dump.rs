//! Stack dump parsing.
//!
//! The `STACK` command's reply body is itself Lua source describing a table
//! of coroutines and frames. The payload is remote-controlled, so it runs in
//! a sandboxed VM created fresh per parse: no `os`/`io`/`debug`/`package`
//! bindings, an instruction budget, and a guard that truncates oversized
//! string literals before execution. A payload that fails anywhere produces
//! an empty dump; a malformed message must never take the session down.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use mlua::{HookTriggers, Lua, Table, Value, VmState};

use crate::value::{RValue, Variable};

/// Maximum number of Lua instructions per payload execution. Dump payloads
/// are data-shaped; anything spinning past this is hostile.
const INSTRUCTION_LIMIT: i64 = 10_000_000;

/// How often to check the instruction budget (every N instructions).
const INSTRUCTION_HOOK_INTERVAL: u32 = 10_000;

/// Maximum length of a single string literal in a payload. Longer literals
/// are truncated before execution to bound memory use.
const STRING_TOKEN_LIMIT: usize = 16 * 1024;

// =============================================================================
// Parsed structure
// =============================================================================

/// One call frame as reported by the dump payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Function name; `"main"` when the payload omits it.
    pub name: String,
    /// Remote source (often an "@"-prefixed chunk name).
    pub source: Option<String>,
    pub line: Option<u32>,
    /// Locals and upvalues as one list, in declared order when the frame
    /// carries an `__order` key.
    pub variables: Vec<Variable>,
}

/// One coroutine's stack as reported by the dump payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CoroutineStackInfo {
    pub id: String,
    pub status: String,
    pub frames: Vec<FrameInfo>,
    /// Stack level of the top frame, used to scope `EXEC` to a frame.
    pub frame_base: u32,
    pub is_current: bool,
}

/// A full suspend-time snapshot: the current coroutine plus all others.
/// Rebuilt wholesale on every suspend, never mutated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackDump {
    pub current: Option<CoroutineStackInfo>,
    pub others: Vec<CoroutineStackInfo>,
}

impl StackDump {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.others.is_empty()
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Execute a dump payload in a fresh sandbox and walk it into a
/// [`StackDump`]. Any failure yields an empty dump.
pub fn parse_stack_dump(payload: &str) -> StackDump {
    match try_parse(payload) {
        Some(dump) => dump,
        None => {
            log::warn!("malformed stack dump payload; producing empty dump");
            StackDump::empty()
        }
    }
}

/// Parse a serialized table literal (an `EXEC` result) into a table value,
/// keeping the original text as the preview content. Non-table results and
/// unparsable text yield `None`.
pub fn parse_table_literal(text: &str) -> Option<RValue> {
    let lua = sandboxed_vm().ok()?;
    let value = eval_guarded(&lua, text).ok()?;
    match RValue::from_raw(&value) {
        RValue::Table { snapshot, .. } => Some(RValue::Table {
            content: text.trim().to_string(),
            snapshot,
        }),
        _ => None,
    }
}

// =============================================================================
// Sandbox
// =============================================================================

/// Fresh sandboxed VM, one per parse. Sharing an instance across parses
/// would leak globals from one payload into the next.
fn sandboxed_vm() -> Result<Lua, mlua::Error> {
    let lua = Lua::new();
    let globals = lua.globals();
    globals.set("os", Value::Nil)?;
    globals.set("io", Value::Nil)?;
    globals.set("debug", Value::Nil)?;
    globals.set("package", Value::Nil)?;
    globals.set("require", Value::Nil)?;
    globals.set("loadfile", Value::Nil)?;
    globals.set("dofile", Value::Nil)?;
    globals.set("load", Value::Nil)?;
    globals.set("collectgarbage", Value::Nil)?;
    Ok(lua)
}

/// Evaluate payload text under the instruction budget. Expression-first:
/// a payload of the form `{...}` is wrapped in `return (...)`; payloads
/// already carrying a `return` execute as-is.
fn eval_guarded(lua: &Lua, code: &str) -> Result<Value, mlua::Error> {
    let guarded = truncate_long_strings(code, STRING_TOKEN_LIMIT);

    let as_expr = format!("return ({})", guarded.trim());
    let chunk = if lua.load(&as_expr).into_function().is_ok() {
        as_expr
    } else {
        guarded
    };

    let budget = Arc::new(AtomicI64::new(INSTRUCTION_LIMIT));
    let budget_hook = budget.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(INSTRUCTION_HOOK_INTERVAL),
        move |_lua, _debug| {
            let remaining =
                budget_hook.fetch_sub(INSTRUCTION_HOOK_INTERVAL as i64, Ordering::Relaxed);
            if remaining <= 0 {
                Err(mlua::Error::RuntimeError(format!(
                    "instruction limit exceeded ({} instructions)",
                    INSTRUCTION_LIMIT
                )))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    let result = lua.load(&chunk).eval::<Value>();
    lua.remove_hook();
    result
}

/// Truncate string literals longer than `limit` bytes. Handles single and
/// double quoted forms with backslash escapes, plus plain `[[ ]]` long
/// brackets. Everything outside string literals passes through untouched.
fn truncate_long_strings(code: &str, limit: usize) -> String {
    let bytes = code.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' => {
                out.push(b);
                i += 1;
                let mut kept = 0usize;
                while i < bytes.len() {
                    let c = bytes[i];
                    if c == b'\\' && i + 1 < bytes.len() {
                        if kept + 2 <= limit {
                            out.push(c);
                            out.push(bytes[i + 1]);
                            kept += 2;
                        }
                        i += 2;
                        continue;
                    }
                    if c == b {
                        out.push(c);
                        i += 1;
                        break;
                    }
                    if kept < limit {
                        out.push(c);
                        kept += 1;
                    }
                    i += 1;
                }
            }
            b'[' if i + 1 < bytes.len() && bytes[i + 1] == b'[' => {
                out.extend_from_slice(b"[[");
                i += 2;
                let mut kept = 0usize;
                while i < bytes.len() {
                    if bytes[i] == b']' && i + 1 < bytes.len() && bytes[i + 1] == b']' {
                        out.extend_from_slice(b"]]");
                        i += 2;
                        break;
                    }
                    if kept < limit {
                        out.push(bytes[i]);
                        kept += 1;
                    }
                    i += 1;
                }
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| code.to_string())
}

// =============================================================================
// Structure walk
// =============================================================================

fn try_parse(payload: &str) -> Option<StackDump> {
    if payload.trim().is_empty() {
        return None;
    }
    let lua = sandboxed_vm().ok()?;
    let root = match eval_guarded(&lua, payload).ok()? {
        Value::Table(t) => t,
        _ => return None,
    };

    let current_table: Table = root.get("current").ok()?;
    let current = walk_coroutine(&current_table, true);

    let mut others = Vec::new();
    if let Ok(Some(list)) = root.get::<Option<Table>>("others") {
        for entry in list.sequence_values::<Table>() {
            match entry {
                Ok(t) => others.push(walk_coroutine(&t, false)),
                Err(_) => continue,
            }
        }
    }

    Some(StackDump {
        current: Some(current),
        others,
    })
}

fn walk_coroutine(table: &Table, current_default: bool) -> CoroutineStackInfo {
    let id = display_field(table, "id");
    let status = display_field(table, "status");
    let frame_base: u32 = table
        .get::<Option<u32>>("frame_base")
        .ok()
        .flatten()
        .unwrap_or(0);
    let is_current = table
        .get::<Option<bool>>("is_current")
        .ok()
        .flatten()
        .unwrap_or(current_default);

    let mut frames = Vec::new();
    if let Ok(Some(list)) = table.get::<Option<Table>>("frames") {
        for entry in list.sequence_values::<Table>() {
            match entry {
                Ok(frame) => frames.push(walk_frame(&frame)),
                Err(_) => continue,
            }
        }
    }

    CoroutineStackInfo {
        id,
        status,
        frames,
        frame_base,
        is_current,
    }
}

/// Field as a display string; tolerates numbers, missing keys, anything.
fn display_field(table: &Table, key: &str) -> String {
    match table.get::<Value>(key) {
        Ok(Value::Nil) | Err(_) => String::new(),
        Ok(value) => crate::value::lua_display(&value),
    }
}

fn walk_frame(table: &Table) -> FrameInfo {
    let name = table
        .get::<Option<String>>("name")
        .ok()
        .flatten()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "main".to_string());
    let source = table.get::<Option<String>>("source").ok().flatten();
    // Negative lines clamp to 0; the stack builder normalizes to 1.
    let line = table
        .get::<Option<i64>>("line")
        .ok()
        .flatten()
        .map(|n| n.max(0) as u32);

    let locals = table.get::<Option<Table>>("locals").ok().flatten();
    let upvalues = table.get::<Option<Table>>("upvalues").ok().flatten();
    let order = table.get::<Option<Vec<String>>>("__order").ok().flatten();

    let variables = match order {
        Some(order) => ordered_variables(&order, locals.as_ref(), upvalues.as_ref()),
        None => natural_variables(locals.as_ref(), upvalues.as_ref()),
    };

    FrameInfo {
        name,
        source,
        line,
        variables,
    }
}

/// Emit variables in the payload's declared order, locals shadowing
/// upvalues on name collisions.
fn ordered_variables(
    order: &[String],
    locals: Option<&Table>,
    upvalues: Option<&Table>,
) -> Vec<Variable> {
    let mut variables = Vec::with_capacity(order.len());
    for name in order {
        let entry = lookup_entry(locals, name).or_else(|| lookup_entry(upvalues, name));
        if let Some(value) = entry {
            variables.push(Variable {
                name: name.clone(),
                value: RValue::from_entry(&value),
                expression: name.clone(),
            });
        }
    }
    variables
}

/// Without explicit ordering: locals first, then upvalues, each in
/// iteration order (stable within one parse).
fn natural_variables(locals: Option<&Table>, upvalues: Option<&Table>) -> Vec<Variable> {
    let mut variables = Vec::new();
    for table in [locals, upvalues].into_iter().flatten() {
        for pair in table.pairs::<String, Value>() {
            let (name, value) = match pair {
                Ok(kv) => kv,
                Err(_) => continue,
            };
            variables.push(Variable {
                name: name.clone(),
                value: RValue::from_entry(&value),
                expression: name,
            });
        }
    }
    variables
}

fn lookup_entry(table: Option<&Table>, name: &str) -> Option<Value> {
    let table = table?;
    match table.get::<Value>(name) {
        Ok(Value::Nil) => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
