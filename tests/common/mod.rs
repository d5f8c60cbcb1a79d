#![allow(dead_code)]

use std::error::Error;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;

use skillbridge::config::WorkerConfig;

pub type TestResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub fn bridge_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_skillbridge"))
}

/// Binds an ephemeral port and keeps the listener so the port cannot be
/// reused by anything else before the test's stand-in worker accepts.
pub fn stub_listener() -> TestResult<(TcpListener, u16)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Reserves a free port for tests that spawn an external worker which binds
/// the port itself.
pub fn free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A config whose "worker" is an arbitrary command; the channel port is
/// whatever the test wired up.
pub fn config_with_command(program: &str, args: &[&str], port: u16) -> WorkerConfig {
    let mut config = WorkerConfig::for_worker_dir(std::env::temp_dir());
    config.program = program.to_string();
    config.args = args.iter().map(|arg| arg.to_string()).collect();
    config.port = port;
    config
}

pub fn write_json_line(socket: &mut TcpStream, line: &str) -> TestResult<()> {
    use std::io::Write;
    socket.write_all(line.as_bytes())?;
    socket.write_all(b"\n")?;
    socket.flush()?;
    Ok(())
}
