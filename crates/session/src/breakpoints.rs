//! Breakpoint registration.
//!
//! Tracks a de-duplicating set of (remote path, line) locations and mirrors
//! every change onto the wire. Re-registering an identical breakpoint
//! re-sends `SETB`; the remote side treats duplicates as idempotent, and
//! re-sending keeps the wire state authoritative after reconnects.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use luascope_protocol::Command;

use crate::dispatch::Dispatcher;
use crate::mapping::PathResolver;

/// A local source position as the IDE reports it: file path plus 0-based
/// editor line.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePosition {
    pub file: String,
    pub line: u32,
}

/// A line breakpoint. The position is optional; breakpoints on files the
/// IDE can no longer locate carry none and are ignored here.
#[derive(Debug, Clone, PartialEq)]
pub struct LineBreakpoint {
    pub position: Option<SourcePosition>,
}

pub struct BreakpointHandler {
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<PathResolver>,
    tracked: Mutex<HashSet<(String, u32)>>,
}

impl BreakpointHandler {
    pub fn new(dispatcher: Arc<Dispatcher>, resolver: Arc<PathResolver>) -> Self {
        Self {
            dispatcher,
            resolver,
            tracked: Mutex::new(HashSet::new()),
        }
    }

    /// Register a breakpoint: one `SETB` per remote candidate. No-op when
    /// the breakpoint has no resolvable position or no candidates exist.
    pub fn register(&self, breakpoint: &LineBreakpoint) {
        let (candidates, line) = match self.wire_locations(breakpoint) {
            Some(pair) => pair,
            None => return,
        };
        let mut tracked = self.tracked.lock().unwrap();
        for candidate in candidates {
            self.dispatcher.send_logged(Command::SetBreakpoint {
                path: candidate.clone(),
                line,
            });
            tracked.insert((candidate, line));
        }
    }

    /// Remove a breakpoint: one `DELB` per remote candidate.
    pub fn unregister(&self, breakpoint: &LineBreakpoint) {
        let (candidates, line) = match self.wire_locations(breakpoint) {
            Some(pair) => pair,
            None => return,
        };
        let mut tracked = self.tracked.lock().unwrap();
        for candidate in candidates {
            self.dispatcher.send_logged(Command::DelBreakpoint {
                path: candidate.clone(),
                line,
            });
            tracked.remove(&(candidate, line));
        }
    }

    /// Clear every breakpoint on the remote side (`DELB * 0`) and locally.
    pub fn clear_all(&self) {
        self.dispatcher
            .send_logged(Command::del_all_breakpoints());
        self.tracked.lock().unwrap().clear();
    }

    /// Re-send `SETB` for every tracked location. Used on attach when
    /// breakpoints were registered before the debuggee connected.
    pub fn replay(&self) {
        let locations: Vec<(String, u32)> =
            self.tracked.lock().unwrap().iter().cloned().collect();
        for (path, line) in locations {
            self.dispatcher
                .send_logged(Command::SetBreakpoint { path, line });
        }
    }

    /// Snapshot of tracked (remote path, line) locations.
    pub fn locations(&self) -> HashSet<(String, u32)> {
        self.tracked.lock().unwrap().clone()
    }

    /// Candidates plus the 1-based wire line for a breakpoint, if it maps.
    fn wire_locations(&self, breakpoint: &LineBreakpoint) -> Option<(Vec<String>, u32)> {
        let position = breakpoint.position.as_ref()?;
        let candidates = self.resolver.remote_candidates(&position.file);
        if candidates.is_empty() {
            return None;
        }
        // Editor lines are 0-based; the wire protocol is 1-based.
        Some((candidates, position.line + 1))
    }
}
