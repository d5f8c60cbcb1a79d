use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use crate::protocol::{SkillRequest, WorldState};

const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum ChannelError {
    Disconnected,
    Protocol(String),
    Io(io::Error),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Disconnected => write!(f, "channel disconnected"),
            ChannelError::Protocol(message) => write!(f, "channel protocol error: {message}"),
            ChannelError::Io(err) => write!(f, "channel io error: {err}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Io(err)
    }
}

#[derive(Default)]
struct ChannelInbox {
    queue: VecDeque<WorldState>,
    protocol_fault: Option<String>,
    disconnected: bool,
}

/// One duplex endpoint carrying newline-delimited JSON records. A reader
/// thread decodes incoming state messages into a condvar-signaled inbox; a
/// writer thread drains outgoing request lines. The bridge keeps at most one
/// request in flight.
pub struct MessageChannel {
    sender: mpsc::Sender<String>,
    inbox: Arc<Mutex<ChannelInbox>>,
    cvar: Arc<Condvar>,
    stream: TcpStream,
    closed: bool,
}

impl MessageChannel {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_ATTEMPT_TIMEOUT)?;
        stream.set_nodelay(true)?;

        let inbox = Arc::new(Mutex::new(ChannelInbox::default()));
        let cvar = Arc::new(Condvar::new());
        spawn_reader(stream.try_clone()?, inbox.clone(), cvar.clone());
        let (tx, rx) = mpsc::channel();
        spawn_writer(rx, stream.try_clone()?);

        Ok(Self {
            sender: tx,
            inbox,
            cvar,
            stream,
            closed: false,
        })
    }

    pub fn send(&self, request: &SkillRequest) -> Result<(), ChannelError> {
        let line = serde_json::to_string(request)
            .map_err(|err| ChannelError::Protocol(err.to_string()))?;
        self.sender
            .send(line)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Bounded-wait receive: returns `Ok(None)` once `wait` elapses with no
    /// message, so the caller can interleave liveness checks.
    pub fn try_receive(&self, wait: Duration) -> Result<Option<WorldState>, ChannelError> {
        let deadline = Instant::now() + wait;
        let mut guard = self.inbox.lock().unwrap();
        loop {
            if let Some(state) = guard.queue.pop_front() {
                return Ok(Some(state));
            }
            if let Some(fault) = guard.protocol_fault.as_ref() {
                return Err(ChannelError::Protocol(fault.clone()));
            }
            if guard.disconnected {
                return Err(ChannelError::Disconnected);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(now);
            let (next_guard, _timeout) = self.cvar.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
        }
    }

    /// Idempotent. Shuts the socket down both ways so the reader thread
    /// unblocks; must run before the worker process is torn down.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader(stream: TcpStream, inbox: Arc<Mutex<ChannelInbox>>, cvar: Arc<Condvar>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    let mut guard = inbox.lock().unwrap();
                    guard.disconnected = true;
                    cvar.notify_all();
                    break;
                }
                Ok(_) => {}
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorldState>(trimmed) {
                Ok(state) => {
                    let mut guard = inbox.lock().unwrap();
                    guard.queue.push_back(state);
                    cvar.notify_all();
                }
                Err(err) => {
                    let mut guard = inbox.lock().unwrap();
                    guard.protocol_fault = Some(format!("unexpected state message: {err}"));
                    cvar.notify_all();
                    break;
                }
            }
        }
    });
}

fn spawn_writer(rx: mpsc::Receiver<String>, stream: TcpStream) {
    thread::spawn(move || {
        let mut writer = BufWriter::new(stream);
        while let Ok(line) = rx.recv() {
            if writer.write_all(line.as_bytes()).is_err()
                || writer.write_all(b"\n").is_err()
                || writer.flush().is_err()
            {
                break;
            }
        }
    });
}
