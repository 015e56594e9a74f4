use std::fmt;

/// Errors from session-layer plumbing (socket I/O, lifecycle).
///
/// Remote-reported protocol failures are not errors at this level; they
/// arrive as `Event::Error` and flow to command callbacks.
#[derive(Debug)]
pub enum SessionError {
    /// No peer is connected; the command was not sent.
    NotConnected,
    /// The listener is already running.
    AlreadyListening,
    /// Socket I/O failed; the connection is considered dead.
    Io(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected => write!(f, "no debuggee connected"),
            SessionError::AlreadyListening => write!(f, "listener already running"),
            SessionError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}
