//! Execution stack assembly.
//!
//! Turns a parsed [`StackDump`] into the display-ready stacks the IDE
//! consumes: one per coroutine, with remote sources resolved to local files
//! and a fallback position for anything unresolvable. Path resolution is
//! behind the [`SourceResolver`] seam so this crate stays ignorant of
//! mapping configuration.

use crate::dump::{CoroutineStackInfo, FrameInfo, StackDump};
use crate::value::Variable;

/// Maps a remote source (possibly an "@"-prefixed chunk name) to a local
/// file path. Implemented by the session's path resolver.
pub trait SourceResolver {
    fn resolve_local(&self, remote_source: &str) -> Option<String>;
}

/// Position to show when a frame's source cannot be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPosition {
    pub file: String,
    pub line: u32,
}

/// A display-ready frame. `eval_frame` is the remote stack level to scope
/// `EXEC` to; only the current coroutine's top frame carries one, since the
/// interpreter evaluates solely in the currently suspended context.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecFrame {
    pub file: String,
    pub line: u32,
    pub variables: Vec<Variable>,
    pub eval_frame: Option<u32>,
}

/// One coroutine's stack with its display name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStack {
    pub display_name: String,
    pub frames: Vec<ExecFrame>,
}

/// Build one execution stack per coroutine, current first.
pub fn build_stacks(
    dump: &StackDump,
    resolver: &dyn SourceResolver,
    fallback: &FallbackPosition,
) -> Vec<ExecutionStack> {
    let mut stacks = Vec::with_capacity(1 + dump.others.len());

    match &dump.current {
        Some(current) => stacks.push(build_stack(current, true, resolver, fallback)),
        None => {
            // Nothing usable came back; still give the IDE a current stack
            // anchored at the suspend position.
            stacks.push(ExecutionStack {
                display_name: "Main Coroutine".to_string(),
                frames: vec![synthetic_frame(fallback, Some(0))],
            });
        }
    }

    for other in &dump.others {
        stacks.push(build_stack(other, false, resolver, fallback));
    }

    stacks
}

fn build_stack(
    info: &CoroutineStackInfo,
    is_current: bool,
    resolver: &dyn SourceResolver,
    fallback: &FallbackPosition,
) -> ExecutionStack {
    let frames = if info.frames.is_empty() {
        let eval = if is_current { Some(info.frame_base) } else { None };
        vec![synthetic_frame(fallback, eval)]
    } else {
        info.frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                let eval = if is_current && index == 0 {
                    Some(info.frame_base)
                } else {
                    None
                };
                build_frame(frame, eval, resolver, fallback)
            })
            .collect()
    };

    ExecutionStack {
        display_name: display_name(info, is_current),
        frames,
    }
}

fn build_frame(
    frame: &FrameInfo,
    eval_frame: Option<u32>,
    resolver: &dyn SourceResolver,
    fallback: &FallbackPosition,
) -> ExecFrame {
    let resolved = frame
        .source
        .as_deref()
        .and_then(|source| resolver.resolve_local(source));

    let (file, line) = match resolved {
        Some(file) => (file, frame.line.unwrap_or(fallback.line)),
        None => (fallback.file.clone(), fallback.line),
    };

    ExecFrame {
        file,
        line: line.max(1),
        variables: frame.variables.clone(),
        eval_frame,
    }
}

/// Single stand-in frame at line 1 of the fallback file, used when a
/// coroutine reports no frames at all.
fn synthetic_frame(fallback: &FallbackPosition, eval_frame: Option<u32>) -> ExecFrame {
    ExecFrame {
        file: fallback.file.clone(),
        line: 1,
        variables: Vec::new(),
        eval_frame,
    }
}

/// `"Main Coroutine"` for the current coroutine, `"Coroutine <id>"` for the
/// rest, with the top frame's name appended unless it is `"main"` or blank,
/// and the status appended for non-current coroutines.
fn display_name(info: &CoroutineStackInfo, is_current: bool) -> String {
    let frame_name = info
        .frames
        .first()
        .map(|f| f.name.as_str())
        .filter(|n| !n.trim().is_empty() && *n != "main");

    let mut name = if is_current {
        "Main Coroutine".to_string()
    } else {
        format!("Coroutine {}", info.id)
    };
    if let Some(frame_name) = frame_name {
        name.push_str(" - ");
        name.push_str(frame_name);
    }
    if !is_current && !info.status.trim().is_empty() {
        name.push_str(&format!(" ({})", info.status));
    }
    name
}
