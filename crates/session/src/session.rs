//! The debug session facade.
//!
//! Ties transport, dispatch, breakpoints and stack reconstruction together
//! for the embedding IDE. The flow on attach: switch stdout redirection on,
//! announce the base directory, replay breakpoints, resume. On every pause
//! notification: request a stack dump, parse it, build execution stacks,
//! hand them to the listener.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use luascope_config::{DebugSettings, PathMapper};
use luascope_engine::dump::parse_stack_dump;
use luascope_engine::stack::{build_stacks, FallbackPosition};
use luascope_engine::ExecutionStack;
use luascope_protocol::{Command, Event, OutputMode};

use crate::breakpoints::BreakpointHandler;
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::eval::Evaluator;
use crate::mapping::PathResolver;
use crate::transport::{LineHandler, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the debuggee to connect.
    Listening,
    /// Attached; the debuggee is executing.
    Running,
    /// Attached; the debuggee is stopped at a position.
    Suspended,
    /// Torn down; no further callbacks fire.
    Detached,
}

/// Callbacks the embedding IDE implements. Invoked on the reader thread;
/// hand off to the UI thread, don't block.
pub trait SessionListener: Send + Sync {
    fn on_attached(&self, peer: SocketAddr) {
        let _ = peer;
    }
    fn on_paused(&self, stacks: Vec<ExecutionStack>) {
        let _ = stacks;
    }
    fn on_resumed(&self) {}
    fn on_output(&self, stream: &str, text: &str) {
        let _ = (stream, text);
    }
    fn on_error(&self, message: &str, details: Option<&str>) {
        let _ = (message, details);
    }
    fn on_detached(&self) {}
}

pub struct DebugSession {
    settings: DebugSettings,
    dispatcher: Arc<Dispatcher>,
    transport: Mutex<Transport>,
    breakpoints: BreakpointHandler,
    evaluator: Evaluator,
    resolver: Arc<PathResolver>,
    listener: Arc<dyn SessionListener>,
    state: Arc<Mutex<SessionState>>,
}

impl DebugSession {
    /// Bind the listen port and wait for the debuggee. The session lives
    /// until [`dispose`](Self::dispose).
    pub fn start(
        settings: DebugSettings,
        project_root: impl AsRef<Path>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Arc<Self>, SessionError> {
        let resolver = Arc::new(PathResolver::new(
            PathMapper::new(settings.mappings.clone()),
            project_root,
        ));
        let transport = Transport::new();
        let dispatcher = Arc::new(Dispatcher::new(Box::new(transport.writer())));

        let session = Arc::new(Self {
            breakpoints: BreakpointHandler::new(dispatcher.clone(), resolver.clone()),
            evaluator: Evaluator::new(dispatcher.clone(), settings.eval_max_depth),
            settings,
            dispatcher: dispatcher.clone(),
            transport: Mutex::new(transport),
            resolver,
            listener,
            state: Arc::new(Mutex::new(SessionState::Listening)),
        });

        // Unsolicited events (pauses, output, broadcast errors).
        let weak = Arc::downgrade(&session);
        dispatcher.add_listener(move |event| {
            if let Some(session) = weak.upgrade() {
                session.handle_event(event);
            }
        });

        let handler = Arc::new(SessionHandler {
            dispatcher,
            session: Arc::downgrade(&session),
        });
        let port = session.settings.port;
        session.transport.lock().unwrap().listen(port, handler)?;

        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn settings(&self) -> &DebugSettings {
        &self.settings
    }

    pub fn breakpoints(&self) -> &BreakpointHandler {
        &self.breakpoints
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.resolver
    }

    /// Bound listen address (useful when the settings request port 0).
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.transport.lock().unwrap().bound_addr()
    }

    pub fn resume(&self) {
        self.control(Command::Run);
    }

    pub fn step_into(&self) {
        self.control(Command::Step);
    }

    pub fn step_over(&self) {
        self.control(Command::Over);
    }

    pub fn step_out(&self) {
        self.control(Command::Out);
    }

    /// Ask the debuggee to stop at the next executed line. The pause
    /// itself arrives later as an unsolicited notification.
    pub fn suspend(&self) {
        self.dispatcher.send_logged(Command::Suspend);
    }

    /// Detach and tear down. Callbacks for commands still in flight are
    /// never invoked. Must not be called from a listener callback, because it
    /// joins the reader thread.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Detached {
                return;
            }
            *state = SessionState::Detached;
        }
        self.dispatcher.send_logged(Command::Exit);
        self.transport.lock().unwrap().stop();
        self.listener.on_detached();
    }

    /// Attach sequence, run once when the debuggee connects.
    fn attach(&self, peer: SocketAddr) {
        log::info!("attaching debuggee {}", peer);
        self.dispatcher.send_logged(Command::Output {
            stream: "stdout".to_string(),
            mode: OutputMode::Copy,
        });
        if let Some(dir) = &self.settings.remote_basedir {
            self.dispatcher
                .send_logged(Command::Basedir { dir: dir.clone() });
        }
        self.breakpoints.replay();
        self.listener.on_attached(peer);
        self.resume();
    }

    fn disconnected(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Detached {
                return;
            }
            *state = SessionState::Detached;
        }
        self.listener.on_detached();
    }

    fn handle_event(&self, event: &Event) {
        match event {
            Event::Paused { file, line, .. } => {
                *self.state.lock().unwrap() = SessionState::Suspended;
                self.request_stack(file.clone(), *line);
            }
            Event::Output { stream, text } => self.listener.on_output(stream, text),
            Event::Error { message, details } => {
                self.listener.on_error(message, details.as_deref());
            }
            Event::Ok(_) | Event::Unknown(_) => {}
        }
    }

    /// Command then callback chain for the flow-control commands.
    fn control(&self, command: Command) {
        let state = self.state.clone();
        let listener = self.listener.clone();
        let listener_err = self.listener.clone();
        self.dispatcher.send(
            command,
            move |_| {
                *state.lock().unwrap() = SessionState::Running;
                listener.on_resumed();
            },
            move |e| listener_err.on_error(&e.message, e.details.as_deref()),
        );
    }

    /// Fetch and rebuild the stacks for a suspend position.
    fn request_stack(&self, file: String, line: u32) {
        let fallback = FallbackPosition {
            file: self.resolver.to_local(&file).unwrap_or(file),
            line: line.max(1),
        };
        let resolver = self.resolver.clone();
        let listener = self.listener.clone();
        let listener_err = self.listener.clone();

        self.dispatcher.send(
            Command::Stack {
                options: Some(format!("{{ maxlevel = {} }}", self.settings.eval_max_depth)),
            },
            move |body| {
                let dump = parse_stack_dump(&body.unwrap_or_default());
                let stacks = build_stacks(&dump, resolver.as_ref(), &fallback);
                listener.on_paused(stacks);
            },
            move |e| listener_err.on_error(&e.message, e.details.as_deref()),
        );
    }
}

/// Bridges the transport thread into the dispatcher and session.
struct SessionHandler {
    dispatcher: Arc<Dispatcher>,
    session: Weak<DebugSession>,
}

impl LineHandler for SessionHandler {
    fn on_line(&self, line: &str) {
        self.dispatcher.handle_line(line);
    }

    fn on_connected(&self, peer: SocketAddr) {
        if let Some(session) = self.session.upgrade() {
            session.attach(peer);
        }
    }

    fn on_disconnected(&self) {
        if let Some(session) = self.session.upgrade() {
            session.disconnected();
        }
    }
}
