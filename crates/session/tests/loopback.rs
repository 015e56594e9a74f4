//! End-to-end session test against a scripted fake debuggee over a real
//! localhost socket.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use luascope_config::DebugSettings;
use luascope_engine::{ExecutionStack, RValue};
use luascope_session::{DebugSession, SessionListener, SessionState};

#[derive(Debug)]
enum Note {
    Attached,
    Paused(Vec<ExecutionStack>),
    Resumed,
    Output(String, String),
    Detached,
}

struct ChannelListener {
    tx: Mutex<mpsc::Sender<Note>>,
}

impl ChannelListener {
    fn new() -> (Arc<Self>, mpsc::Receiver<Note>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }

    fn send(&self, note: Note) {
        let _ = self.tx.lock().unwrap().send(note);
    }
}

impl SessionListener for ChannelListener {
    fn on_attached(&self, _peer: SocketAddr) {
        self.send(Note::Attached);
    }
    fn on_paused(&self, stacks: Vec<ExecutionStack>) {
        self.send(Note::Paused(stacks));
    }
    fn on_resumed(&self) {
        self.send(Note::Resumed);
    }
    fn on_output(&self, stream: &str, text: &str) {
        self.send(Note::Output(stream.to_string(), text.to_string()));
    }
    fn on_detached(&self) {
        self.send(Note::Detached);
    }
}

struct FakeDebuggee {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl FakeDebuggee {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let writer = stream.try_clone().unwrap();
        Self {
            reader: BufReader::new(stream),
            writer,
        }
    }

    fn expect_line(&mut self, expected: &str) {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), expected);
    }

    fn read_command(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn reply(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.writer.flush().unwrap();
    }
}

fn recv(rx: &mpsc::Receiver<Note>) -> Note {
    rx.recv_timeout(Duration::from_secs(10))
        .expect("timed out waiting for session event")
}

const DUMP_PAYLOAD: &str = r#"{ current = { id = "main", status = "running", frames = { { name = "update", source = "@game/player.script", line = 12, locals = { hp = {100, "100"} }, __order = {"hp"} } } } }"#;

#[test]
fn loopback_attach_pause_output_dispose() {
    let (listener, rx) = ChannelListener::new();
    let settings = DebugSettings {
        port: 0,
        ..Default::default()
    };
    let session = DebugSession::start(settings, "/proj", listener).unwrap();
    assert_eq!(session.state(), SessionState::Listening);

    let mut debuggee = FakeDebuggee::connect(session.bound_addr().unwrap());

    // Attach sequence: stdout redirection, then resume.
    debuggee.expect_line("OUTPUT stdout c");
    debuggee.reply("200 OK");
    debuggee.expect_line("RUN");
    debuggee.reply("200 OK");

    assert!(matches!(recv(&rx), Note::Attached));
    assert!(matches!(recv(&rx), Note::Resumed));

    // Suspend: the IDE answers with a STACK request.
    debuggee.reply("202 Paused game/player.script 12");
    let stack_cmd = debuggee.read_command();
    assert_eq!(stack_cmd, "STACK -- { maxlevel = 2 }");
    debuggee.reply(&format!("200 OK {}", DUMP_PAYLOAD.len()));
    debuggee.reply(DUMP_PAYLOAD);

    match recv(&rx) {
        Note::Paused(stacks) => {
            assert_eq!(stacks.len(), 1);
            assert_eq!(stacks[0].display_name, "Main Coroutine - update");
            let frame = &stacks[0].frames[0];
            assert_eq!(frame.file, "/proj/game/player.script");
            assert_eq!(frame.line, 12);
            assert_eq!(frame.eval_frame, Some(0));
            assert_eq!(frame.variables.len(), 1);
            assert_eq!(frame.variables[0].name, "hp");
            assert_eq!(frame.variables[0].value, RValue::Num(100.0));
        }
        other => panic!("expected Paused, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Suspended);

    // Remote print output.
    debuggee.reply("204 Output stdout 6");
    debuggee.reply("hello");
    match recv(&rx) {
        Note::Output(stream, text) => {
            assert_eq!(stream, "stdout");
            assert_eq!(text, "hello\n");
        }
        other => panic!("expected Output, got {:?}", other),
    }

    // Teardown: EXIT goes out, the listener hears exactly one detach.
    session.dispose();
    assert!(matches!(recv(&rx), Note::Detached));
    assert_eq!(session.state(), SessionState::Detached);
}

#[test]
fn breakpoints_registered_before_attach_are_replayed() {
    let (listener, rx) = ChannelListener::new();
    let settings = DebugSettings {
        port: 0,
        ..Default::default()
    };
    let session = DebugSession::start(settings, "/proj", listener).unwrap();

    session
        .breakpoints()
        .register(&luascope_session::LineBreakpoint {
            position: Some(luascope_session::SourcePosition {
                file: "/proj/main.lua".to_string(),
                line: 4,
            }),
        });
    // Not connected yet: the SETB sends fail, but the locations stay
    // tracked for replay.
    assert_eq!(session.breakpoints().locations().len(), 2);

    let mut debuggee = FakeDebuggee::connect(session.bound_addr().unwrap());
    debuggee.expect_line("OUTPUT stdout c");
    debuggee.reply("200 OK");

    // Replay order over a set is unspecified; collect both SETB lines.
    let mut setbs = vec![debuggee.read_command(), debuggee.read_command()];
    setbs.sort();
    assert_eq!(setbs, ["SETB @main.lua 5", "SETB main.lua 5"]);
    debuggee.reply("200 OK");
    debuggee.reply("200 OK");

    debuggee.expect_line("RUN");
    debuggee.reply("200 OK");
    assert!(matches!(recv(&rx), Note::Attached));

    session.dispose();
}
