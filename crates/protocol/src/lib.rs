//! LuaScope MobDebug Protocol - Frozen Line Format
//!
//! This crate defines the canonical wire types for IDE ↔ interpreter
//! communication. The wire format is newline-terminated UTF-8 text over TCP:
//! the IDE sends upper-case command lines, the interpreter answers with
//! numeric status lines (`200`, `202`, `203`, `204`, `400`, `401`), some of
//! which declare a byte length and are followed by exactly that many raw
//! body bytes.
//!
//! Everything here is pure: no sockets, no threads, no state beyond the
//! single in-flight [`BodyAssembler`]. The stateful dispatcher (pending
//! command queue, listener broadcast) lives in `luascope-session`.
//!
//! # Usage
//!
//! ```
//! use luascope_protocol::{Command, StatusLine};
//!
//! let wire = Command::SetBreakpoint { path: "/main.lua".into(), line: 12 }.to_wire();
//! assert_eq!(wire, "SETB /main.lua 12");
//!
//! match StatusLine::classify("202 Paused /main.lua 12") {
//!     StatusLine::Paused { file, line, watch } => {
//!         assert_eq!((file.as_str(), line, watch), ("/main.lua", 12, None));
//!     }
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```

// =============================================================================
// Constants
// =============================================================================

/// Default TCP port the debugger listens on (MobDebug convention).
pub const DEFAULT_PORT: u16 = 8172;

// =============================================================================
// Commands (IDE → interpreter)
// =============================================================================

/// Discriminant of a [`Command`], kept alongside each pending reply so the
/// dispatcher knows whether a `200 OK <n>` tail is a message or a body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Run,
    Step,
    Over,
    Out,
    Suspend,
    Exit,
    SetBreakpoint,
    DelBreakpoint,
    Basedir,
    Output,
    Stack,
    Exec,
}

impl CommandKind {
    /// Whether a successful reply to this command carries a length-declared
    /// body (`200 OK <length>` followed by raw bytes).
    pub fn expects_body(&self) -> bool {
        matches!(self, CommandKind::Stack | CommandKind::Exec)
    }
}

/// Remote stdout redirection mode for the `OUTPUT` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Copy: output reaches both the IDE and the process's own stdout.
    Copy,
    /// Redirect: output reaches only the IDE.
    Redirect,
    /// Disable redirection.
    Disable,
}

impl OutputMode {
    fn as_wire(&self) -> &'static str {
        match self {
            OutputMode::Copy => "c",
            OutputMode::Redirect => "r",
            OutputMode::Disable => "d",
        }
    }
}

/// A command sent from the IDE to the interpreter.
///
/// `to_wire` produces the exact line written to the socket (without the
/// trailing newline; the transport owns the terminator).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Resume execution.
    Run,
    /// Step into.
    Step,
    /// Step over.
    Over,
    /// Step out.
    Out,
    /// Suspend at the next executed line.
    Suspend,
    /// Detach; the interpreter continues without the debugger.
    Exit,
    /// Set a line breakpoint at a remote path.
    SetBreakpoint { path: String, line: u32 },
    /// Delete a line breakpoint. `path == "*"` with `line == 0` clears all.
    DelBreakpoint { path: String, line: u32 },
    /// Tell the interpreter the base directory for relative chunk names.
    Basedir { dir: String },
    /// Switch stdout redirection for a remote stream.
    Output { stream: String, mode: OutputMode },
    /// Request a serialized stack dump, with optional serialization options
    /// (e.g. `maxlevel = 2`).
    Stack { options: Option<String> },
    /// Execute code in the suspended interpreter. `frame` scopes the
    /// execution to a stack level; `options` passes serialization options.
    /// Frame and options compose independently in the trailing comment
    /// clause: `-- { stack = N, opts }`.
    Exec {
        code: String,
        frame: Option<u32>,
        options: Option<String>,
    },
}

impl Command {
    /// Clear-all-breakpoints form (`DELB * 0`).
    pub fn del_all_breakpoints() -> Self {
        Command::DelBreakpoint {
            path: "*".to_string(),
            line: 0,
        }
    }

    /// The discriminant used for reply correlation.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Run => CommandKind::Run,
            Command::Step => CommandKind::Step,
            Command::Over => CommandKind::Over,
            Command::Out => CommandKind::Out,
            Command::Suspend => CommandKind::Suspend,
            Command::Exit => CommandKind::Exit,
            Command::SetBreakpoint { .. } => CommandKind::SetBreakpoint,
            Command::DelBreakpoint { .. } => CommandKind::DelBreakpoint,
            Command::Basedir { .. } => CommandKind::Basedir,
            Command::Output { .. } => CommandKind::Output,
            Command::Stack { .. } => CommandKind::Stack,
            Command::Exec { .. } => CommandKind::Exec,
        }
    }

    /// Serialize to the wire line (no trailing newline).
    pub fn to_wire(&self) -> String {
        match self {
            Command::Run => "RUN".to_string(),
            Command::Step => "STEP".to_string(),
            Command::Over => "OVER".to_string(),
            Command::Out => "OUT".to_string(),
            Command::Suspend => "SUSPEND".to_string(),
            Command::Exit => "EXIT".to_string(),
            Command::SetBreakpoint { path, line } => format!("SETB {} {}", path, line),
            Command::DelBreakpoint { path, line } => format!("DELB {} {}", path, line),
            Command::Basedir { dir } => format!("BASEDIR {}", dir),
            Command::Output { stream, mode } => {
                format!("OUTPUT {} {}", stream, mode.as_wire())
            }
            Command::Stack { options } => match options {
                Some(opts) => format!("STACK -- {}", opts),
                None => "STACK".to_string(),
            },
            Command::Exec {
                code,
                frame,
                options,
            } => match (frame, options) {
                (None, None) => format!("EXEC {}", code),
                (Some(n), None) => format!("EXEC {} -- {{ stack = {} }}", code, n),
                (None, Some(opts)) => format!("EXEC {} -- {{ {} }}", code, opts),
                (Some(n), Some(opts)) => {
                    format!("EXEC {} -- {{ stack = {}, {} }}", code, n, opts)
                }
            },
        }
    }
}

// =============================================================================
// Events (dispatched to the IDE)
// =============================================================================

/// A typed protocol event: either the completion of a pending command or an
/// unsolicited notification. Produced once per reply, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Command succeeded, with an optional message or body text.
    Ok(Option<String>),
    /// Execution suspended at a remote position. `watch` carries the watch
    /// index from a `203` reply; `202` replies leave it `None`.
    Paused {
        file: String,
        line: u32,
        watch: Option<u32>,
    },
    /// Redirected output from a remote stream.
    Output { stream: String, text: String },
    /// Remote-reported failure (`400`/`401`).
    Error {
        message: String,
        details: Option<String>,
    },
    /// A line no handler recognized. Non-fatal; kept for visibility.
    Unknown(String),
}

// =============================================================================
// Status-line classification
// =============================================================================

/// The result of classifying one received line by its numeric status prefix.
///
/// Length-declaring variants (`OutputHeader`, `ErrorHeader`) do not carry the
/// body; the caller starts a [`BodyAssembler`] for the declared byte count.
/// A `200` tail is returned raw because its meaning (message vs. body length)
/// depends on the pending command's [`CommandKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLine {
    /// `200 OK [tail]`.
    Ok { tail: Option<String> },
    /// `202 Paused <file> <line>` or `203 Paused <file> <line> [watch]`.
    Paused {
        file: String,
        line: u32,
        watch: Option<u32>,
    },
    /// `204 Output <stream> <length>`.
    OutputHeader { stream: String, length: usize },
    /// `400 Bad Request ...`; the full raw line is preserved as details.
    BadRequest { raw: String },
    /// `401 [summary] [length]`.
    ErrorHeader { summary: String, length: usize },
    /// Unrecognized status code or malformed payload.
    Unknown { raw: String },
}

impl StatusLine {
    /// Classify a single received line (terminator already stripped).
    pub fn classify(line: &str) -> StatusLine {
        let code = match line.get(..3).and_then(|s| s.parse::<u16>().ok()) {
            Some(code) => code,
            None => return StatusLine::Unknown { raw: line.to_string() },
        };
        let rest = line[3..].trim();

        match code {
            200 => {
                let tail = rest.strip_prefix("OK").unwrap_or(rest).trim();
                StatusLine::Ok {
                    tail: if tail.is_empty() {
                        None
                    } else {
                        Some(tail.to_string())
                    },
                }
            }
            202 => match parse_paused(rest, false) {
                Some((file, line_no, _)) => StatusLine::Paused {
                    file,
                    line: line_no,
                    watch: None,
                },
                None => StatusLine::Unknown { raw: line.to_string() },
            },
            203 => match parse_paused(rest, true) {
                Some((file, line_no, watch)) => StatusLine::Paused {
                    file,
                    line: line_no,
                    watch,
                },
                None => StatusLine::Unknown { raw: line.to_string() },
            },
            204 => match parse_output_header(rest) {
                Some((stream, length)) => StatusLine::OutputHeader { stream, length },
                None => StatusLine::Unknown { raw: line.to_string() },
            },
            400 => StatusLine::BadRequest {
                raw: line.to_string(),
            },
            401 => {
                let (summary, length) = parse_error_header(rest);
                StatusLine::ErrorHeader { summary, length }
            }
            _ => StatusLine::Unknown { raw: line.to_string() },
        }
    }
}

/// Parse `Paused <file> <line> [watch]`. The file is everything up to the
/// trailing integer token(s), so paths containing spaces survive.
fn parse_paused(rest: &str, allow_watch: bool) -> Option<(String, u32, Option<u32>)> {
    let rest = rest.strip_prefix("Paused")?.trim();

    let (head, last) = rsplit_token(rest)?;
    let last_num = last.parse::<u32>().ok()?;

    if allow_watch {
        // With a watch index the line number is the second-to-last token.
        if let Some((file_part, line_tok)) = rsplit_token(head) {
            if let Ok(line_no) = line_tok.parse::<u32>() {
                if !file_part.is_empty() {
                    return Some((file_part.to_string(), line_no, Some(last_num)));
                }
            }
        }
        // Missing watch index parses as None, not an error.
    }

    if head.is_empty() {
        return None;
    }
    Some((head.to_string(), last_num, None))
}

/// Parse `Output <stream> <length>`.
fn parse_output_header(rest: &str) -> Option<(String, usize)> {
    let rest = rest.strip_prefix("Output")?.trim();
    let (stream, len_tok) = rsplit_token(rest)?;
    let length = len_tok.parse::<usize>().ok()?;
    if stream.is_empty() {
        return None;
    }
    Some((stream.to_string(), length))
}

/// Parse `[summary] [length]` after a `401`. Both parts are optional:
/// the summary defaults to `"Error"` and the length to `0`.
fn parse_error_header(rest: &str) -> (String, usize) {
    if rest.is_empty() {
        return ("Error".to_string(), 0);
    }
    match rsplit_token(rest) {
        Some((head, last)) => match last.parse::<usize>() {
            Ok(length) => {
                let summary = if head.is_empty() {
                    "Error".to_string()
                } else {
                    head.to_string()
                };
                (summary, length)
            }
            Err(_) => (rest.to_string(), 0),
        },
        None => (rest.to_string(), 0),
    }
}

/// Split off the last whitespace-delimited token: `"a b c"` → `("a b", "c")`.
fn rsplit_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match s.rfind(char::is_whitespace) {
        Some(idx) => Some((s[..idx].trim_end(), s[idx + 1..].trim_start())),
        None => Some(("", s)),
    }
}

// =============================================================================
// Body assembly
// =============================================================================

/// Accumulates a length-declared reply body across newline-terminated lines.
///
/// At most one assembler is live per connection at a time: the interpreter
/// never interleaves a second length-declared reply while a body is pending.
/// Each consumed line is appended together with its terminator; assembly is
/// complete once the accumulated byte count reaches the declared length, and
/// [`complete`](BodyAssembler::complete) truncates any terminator overshoot.
#[derive(Debug)]
pub struct BodyAssembler {
    expected: usize,
    buf: Vec<u8>,
}

impl BodyAssembler {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            buf: Vec::with_capacity(expected),
        }
    }

    /// Number of bytes the body declared.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Whether the declared byte count has been reached. True immediately
    /// for a zero-length body.
    pub fn is_complete(&self) -> bool {
        self.buf.len() >= self.expected
    }

    /// Append one received line (terminator re-added). Returns `true`
    /// exactly on the call where the accumulated length first reaches the
    /// declared length.
    pub fn consume_line(&mut self, line: &str) -> bool {
        let was_complete = self.is_complete();
        self.buf.extend_from_slice(line.as_bytes());
        self.buf.push(b'\n');
        !was_complete && self.is_complete()
    }

    /// Yield exactly `expected` bytes, truncating terminator overshoot.
    pub fn complete(mut self) -> Vec<u8> {
        self.buf.truncate(self.expected);
        self.buf
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- commands ------------------------------------------------------------

    #[test]
    fn test_simple_command_wire_forms() {
        assert_eq!(Command::Run.to_wire(), "RUN");
        assert_eq!(Command::Step.to_wire(), "STEP");
        assert_eq!(Command::Over.to_wire(), "OVER");
        assert_eq!(Command::Out.to_wire(), "OUT");
        assert_eq!(Command::Suspend.to_wire(), "SUSPEND");
        assert_eq!(Command::Exit.to_wire(), "EXIT");
    }

    #[test]
    fn test_breakpoint_command_wire_forms() {
        let set = Command::SetBreakpoint {
            path: "/game/player.script".into(),
            line: 42,
        };
        assert_eq!(set.to_wire(), "SETB /game/player.script 42");

        let del = Command::DelBreakpoint {
            path: "@/game/player.script".into(),
            line: 42,
        };
        assert_eq!(del.to_wire(), "DELB @/game/player.script 42");

        assert_eq!(Command::del_all_breakpoints().to_wire(), "DELB * 0");
    }

    #[test]
    fn test_basedir_and_output_wire_forms() {
        let basedir = Command::Basedir {
            dir: "/home/dev/project".into(),
        };
        assert_eq!(basedir.to_wire(), "BASEDIR /home/dev/project");

        let out = Command::Output {
            stream: "stdout".into(),
            mode: OutputMode::Copy,
        };
        assert_eq!(out.to_wire(), "OUTPUT stdout c");

        let out = Command::Output {
            stream: "stdout".into(),
            mode: OutputMode::Redirect,
        };
        assert_eq!(out.to_wire(), "OUTPUT stdout r");
    }

    #[test]
    fn test_stack_command_wire_forms() {
        assert_eq!(Command::Stack { options: None }.to_wire(), "STACK");
        assert_eq!(
            Command::Stack {
                options: Some("{ maxlevel = 2 }".into())
            }
            .to_wire(),
            "STACK -- { maxlevel = 2 }"
        );
    }

    #[test]
    fn test_exec_command_composes_frame_and_options() {
        let bare = Command::Exec {
            code: "return x".into(),
            frame: None,
            options: None,
        };
        assert_eq!(bare.to_wire(), "EXEC return x");

        let framed = Command::Exec {
            code: "return x".into(),
            frame: Some(3),
            options: None,
        };
        assert_eq!(framed.to_wire(), "EXEC return x -- { stack = 3 }");

        let optioned = Command::Exec {
            code: "return x".into(),
            frame: None,
            options: Some("maxlevel = 1".into()),
        };
        assert_eq!(optioned.to_wire(), "EXEC return x -- { maxlevel = 1 }");

        let both = Command::Exec {
            code: "return x".into(),
            frame: Some(0),
            options: Some("maxlevel = 1".into()),
        };
        assert_eq!(both.to_wire(), "EXEC return x -- { stack = 0, maxlevel = 1 }");
    }

    #[test]
    fn test_command_kinds_expecting_bodies() {
        assert!(CommandKind::Stack.expects_body());
        assert!(CommandKind::Exec.expects_body());
        assert!(!CommandKind::Run.expects_body());
        assert!(!CommandKind::SetBreakpoint.expects_body());
        assert_eq!(
            Command::Stack { options: None }.kind(),
            CommandKind::Stack
        );
    }

    // -- classification ------------------------------------------------------

    #[test]
    fn test_classify_ok_without_tail() {
        assert_eq!(StatusLine::classify("200 OK"), StatusLine::Ok { tail: None });
    }

    #[test]
    fn test_classify_ok_with_message() {
        assert_eq!(
            StatusLine::classify("200 OK 0.5"),
            StatusLine::Ok {
                tail: Some("0.5".to_string())
            }
        );
    }

    #[test]
    fn test_classify_paused_202() {
        assert_eq!(
            StatusLine::classify("202 Paused /src/main.lua 10"),
            StatusLine::Paused {
                file: "/src/main.lua".into(),
                line: 10,
                watch: None,
            }
        );
    }

    #[test]
    fn test_classify_paused_202_path_with_spaces() {
        assert_eq!(
            StatusLine::classify("202 Paused /my dir/main.lua 7"),
            StatusLine::Paused {
                file: "/my dir/main.lua".into(),
                line: 7,
                watch: None,
            }
        );
    }

    #[test]
    fn test_classify_paused_203_with_watch() {
        assert_eq!(
            StatusLine::classify("203 Paused /src/main.lua 10 2"),
            StatusLine::Paused {
                file: "/src/main.lua".into(),
                line: 10,
                watch: Some(2),
            }
        );
    }

    #[test]
    fn test_classify_paused_203_missing_watch_is_none() {
        assert_eq!(
            StatusLine::classify("203 Paused /src/main.lua 10"),
            StatusLine::Paused {
                file: "/src/main.lua".into(),
                line: 10,
                watch: None,
            }
        );
    }

    #[test]
    fn test_classify_malformed_paused_is_unknown() {
        assert!(matches!(
            StatusLine::classify("202 Paused"),
            StatusLine::Unknown { .. }
        ));
        assert!(matches!(
            StatusLine::classify("202 Paused /src/main.lua ten"),
            StatusLine::Unknown { .. }
        ));
    }

    #[test]
    fn test_classify_output_header() {
        assert_eq!(
            StatusLine::classify("204 Output stdout 12"),
            StatusLine::OutputHeader {
                stream: "stdout".into(),
                length: 12,
            }
        );
    }

    #[test]
    fn test_classify_bad_request_keeps_raw() {
        assert_eq!(
            StatusLine::classify("400 Bad Request SETB nope"),
            StatusLine::BadRequest {
                raw: "400 Bad Request SETB nope".into()
            }
        );
    }

    #[test]
    fn test_classify_error_header_with_summary_and_length() {
        assert_eq!(
            StatusLine::classify("401 Runtime Error 5"),
            StatusLine::ErrorHeader {
                summary: "Runtime Error".into(),
                length: 5,
            }
        );
    }

    #[test]
    fn test_classify_error_header_defaults() {
        // No summary, no length.
        assert_eq!(
            StatusLine::classify("401"),
            StatusLine::ErrorHeader {
                summary: "Error".into(),
                length: 0,
            }
        );
        // Length only.
        assert_eq!(
            StatusLine::classify("401 7"),
            StatusLine::ErrorHeader {
                summary: "Error".into(),
                length: 7,
            }
        );
        // Summary only, no trailing integer.
        assert_eq!(
            StatusLine::classify("401 Compile Failure"),
            StatusLine::ErrorHeader {
                summary: "Compile Failure".into(),
                length: 0,
            }
        );
    }

    #[test]
    fn test_classify_unknown_code() {
        assert!(matches!(
            StatusLine::classify("999 Something"),
            StatusLine::Unknown { .. }
        ));
        assert!(matches!(
            StatusLine::classify("hi"),
            StatusLine::Unknown { .. }
        ));
        assert!(matches!(
            StatusLine::classify(""),
            StatusLine::Unknown { .. }
        ));
    }

    // -- body assembly -------------------------------------------------------

    #[test]
    fn test_body_assembler_single_line() {
        let mut asm = BodyAssembler::new(5);
        assert!(asm.consume_line("boom!"));
        assert_eq!(asm.complete(), b"boom!");
    }

    #[test]
    fn test_body_assembler_truncates_terminator_overshoot() {
        // Declared 4 bytes; the line plus terminator is 5.
        let mut asm = BodyAssembler::new(4);
        assert!(asm.consume_line("boom"));
        assert_eq!(asm.complete(), b"boom");
    }

    #[test]
    fn test_body_assembler_spans_multiple_lines() {
        // "one\ntwo\n" is 8 bytes.
        let mut asm = BodyAssembler::new(8);
        assert!(!asm.consume_line("one"));
        assert!(asm.consume_line("two"));
        assert_eq!(asm.complete(), b"one\ntwo\n");
    }

    #[test]
    fn test_body_assembler_completes_exactly_once() {
        let mut asm = BodyAssembler::new(3);
        assert!(asm.consume_line("abc"));
        // Already complete: further lines do not re-trigger completion.
        assert!(!asm.consume_line("def"));
        assert_eq!(asm.complete(), b"abc");
    }

    #[test]
    fn test_body_assembler_zero_length() {
        let asm = BodyAssembler::new(0);
        assert!(asm.is_complete());
        assert_eq!(asm.complete(), b"");
    }

    #[test]
    fn test_body_assembler_interior_newline_counts() {
        // Body "a\nb" (3 bytes) arrives as two lines.
        let mut asm = BodyAssembler::new(3);
        assert!(!asm.consume_line("a"));
        assert!(asm.consume_line("b"));
        assert_eq!(asm.complete(), b"a\nb");
    }
}
