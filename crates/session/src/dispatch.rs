//! Reply correlation and event dispatch.
//!
//! Converts the transport's line stream into completed commands and
//! broadcast events. Replies complete pending commands strictly FIFO: the
//! remote interpreter is synchronous, one reply per request in order.
//! Unsolicited notifications (`Paused`, output, bad requests) interleave
//! freely and never consume the pending queue.
//!
//! Lines arrive on the single reader thread, so handling is serialized; the
//! pending queue and the single awaiting-body slot are locked because
//! commands may be *sent* from any thread.

use std::collections::VecDeque;
use std::sync::Mutex;

use luascope_protocol::{BodyAssembler, Command, CommandKind, Event, StatusLine};

use crate::error::SessionError;

/// Where outgoing command lines go. The live implementation is the
/// transport's [`LineWriter`](crate::transport::LineWriter); tests substitute
/// an in-memory sink.
pub trait CommandSink: Send + Sync {
    fn send_line(&self, line: &str) -> Result<(), SessionError>;
}

impl CommandSink for crate::transport::LineWriter {
    fn send_line(&self, line: &str) -> Result<(), SessionError> {
        crate::transport::LineWriter::send_line(self, line)
    }
}

/// A remote-reported failure routed to a command's error callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub message: String,
    pub details: Option<String>,
}

type ResultFn = Box<dyn FnOnce(Option<String>) + Send>;
type ErrorFn = Box<dyn FnOnce(RemoteError) + Send>;
type ListenerFn = Box<dyn Fn(&Event) + Send>;

/// One outstanding command, consumed exactly once by the next matching
/// reply. Callbacks for commands in flight at disposal are never invoked.
struct PendingCommand {
    kind: CommandKind,
    on_result: ResultFn,
    on_error: ErrorFn,
}

/// What to do with a finished body.
enum BodyTarget {
    /// `200 OK <length>`: the body text is the command's result message.
    CommandResult(PendingCommand),
    /// `401 <summary> <length>`: the body text is the error details.
    CommandError {
        summary: String,
        command: Option<PendingCommand>,
    },
    /// `204 Output <stream> <length>`: broadcast as an output event.
    Output { stream: String },
}

struct AwaitingBody {
    assembler: BodyAssembler,
    target: BodyTarget,
}

/// The protocol dispatcher.
pub struct Dispatcher {
    sink: Box<dyn CommandSink>,
    pending: Mutex<VecDeque<PendingCommand>>,
    awaiting: Mutex<Option<AwaitingBody>>,
    listeners: Mutex<Vec<ListenerFn>>,
}

impl Dispatcher {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self {
            sink,
            pending: Mutex::new(VecDeque::new()),
            awaiting: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to broadcast events. Listeners run on the reader thread
    /// and must not block.
    pub fn add_listener(&self, listener: impl Fn(&Event) + Send + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Send a command, enqueueing its callbacks for the next matching
    /// reply. The queue is held across the write so wire order matches
    /// queue order when commands are sent from multiple threads.
    pub fn send(
        &self,
        command: Command,
        on_result: impl FnOnce(Option<String>) + Send + 'static,
        on_error: impl FnOnce(RemoteError) + Send + 'static,
    ) {
        let wire = command.to_wire();
        let entry = PendingCommand {
            kind: command.kind(),
            on_result: Box::new(on_result),
            on_error: Box::new(on_error),
        };

        let mut pending = self.pending.lock().unwrap();
        pending.push_back(entry);
        log::debug!("-> {}", wire);
        if let Err(e) = self.sink.send_line(&wire) {
            // Never sent, so no reply will come: take it straight back out.
            let entry = pending.pop_back().unwrap();
            drop(pending);
            (entry.on_error)(RemoteError {
                message: e.to_string(),
                details: None,
            });
        }
    }

    /// Send a command whose outcome nobody waits on (breakpoint traffic,
    /// attach housekeeping). Failures are logged.
    pub fn send_logged(&self, command: Command) {
        let wire = command.to_wire();
        self.send(
            command,
            |_| {},
            move |e| log::warn!("command '{}' failed: {}", wire, e.message),
        );
    }

    /// Handle one received line: body assembly first, then status
    /// classification.
    pub fn handle_line(&self, line: &str) {
        let mut awaiting = self.awaiting.lock().unwrap();
        if let Some(body) = awaiting.as_mut() {
            if body.assembler.consume_line(line) {
                let finished = awaiting.take().unwrap();
                drop(awaiting);
                self.finish_body(finished);
            }
            return;
        }
        drop(awaiting);

        log::debug!("<- {}", line);
        match StatusLine::classify(line) {
            StatusLine::Ok { tail } => self.handle_ok(tail),
            StatusLine::Paused { file, line, watch } => {
                self.broadcast(&Event::Paused { file, line, watch });
            }
            StatusLine::OutputHeader { stream, length } => {
                self.begin_body(length, BodyTarget::Output { stream });
            }
            StatusLine::BadRequest { raw } => self.handle_bad_request(raw),
            StatusLine::ErrorHeader { summary, length } => {
                let command = self.pending.lock().unwrap().pop_front();
                self.begin_body(length, BodyTarget::CommandError { summary, command });
            }
            StatusLine::Unknown { raw } => {
                log::warn!("unrecognized protocol line: {}", raw);
                self.broadcast(&Event::Unknown(raw));
            }
        }
    }

    /// `200 OK [tail]`: completes the oldest pending command. For
    /// body-bearing commands an integer tail is the declared body length,
    /// and completion waits for the body.
    fn handle_ok(&self, tail: Option<String>) {
        let command = self.pending.lock().unwrap().pop_front();
        let command = match command {
            Some(c) => c,
            None => {
                // Nothing outstanding; keep the reply visible.
                self.broadcast(&Event::Ok(tail));
                return;
            }
        };

        if command.kind.expects_body() {
            if let Some(length) = tail.as_deref().and_then(|t| t.parse::<usize>().ok()) {
                self.begin_body(length, BodyTarget::CommandResult(command));
                return;
            }
        }
        (command.on_result)(tail);
    }

    /// `400`: route to the oldest pending command if any, and broadcast
    /// regardless so unsolicited bad requests stay visible.
    fn handle_bad_request(&self, raw: String) {
        let error = RemoteError {
            message: "Bad Request".to_string(),
            details: Some(raw),
        };
        if let Some(command) = self.pending.lock().unwrap().pop_front() {
            (command.on_error)(error.clone());
        }
        self.broadcast(&Event::Error {
            message: error.message,
            details: error.details,
        });
    }

    /// Enter body assembly, or finish immediately for a zero-length body.
    fn begin_body(&self, length: usize, target: BodyTarget) {
        let assembler = BodyAssembler::new(length);
        let awaiting = AwaitingBody { assembler, target };
        if awaiting.assembler.is_complete() {
            self.finish_body(awaiting);
            return;
        }
        *self.awaiting.lock().unwrap() = Some(awaiting);
    }

    fn finish_body(&self, awaiting: AwaitingBody) {
        let text = String::from_utf8_lossy(&awaiting.assembler.complete()).into_owned();
        match awaiting.target {
            BodyTarget::CommandResult(command) => (command.on_result)(Some(text)),
            BodyTarget::CommandError { summary, command } => {
                let details = if text.is_empty() { None } else { Some(text) };
                match command {
                    Some(command) => (command.on_error)(RemoteError {
                        message: summary,
                        details,
                    }),
                    None => self.broadcast(&Event::Error {
                        message: summary,
                        details,
                    }),
                }
            }
            BodyTarget::Output { stream } => self.broadcast(&Event::Output { stream, text }),
        }
    }

    fn broadcast(&self, event: &Event) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event);
        }
    }

    /// Number of commands still waiting for replies.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
