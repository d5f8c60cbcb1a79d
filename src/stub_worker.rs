use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpListener;

use serde_json::{Map, json};

use crate::protocol::{SkillRequest, WorldState};

pub const STUB_WORKER_MODE_ARG: &str = "stub-worker";

/// A minimal stand-in for the real worker: binds the channel port, pushes
/// the startup state message, then echoes every request with an updated
/// state. Used by the integration tests and for smoke-testing the bridge
/// without a worker installation.
pub fn run(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    let (socket, _) = listener.accept()?;
    let mut reader = BufReader::new(socket.try_clone()?);
    let mut writer = BufWriter::new(socket);

    let mut invocations = 0u64;
    write_state(&mut writer, invocations, None)?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            // Driver closed the channel; session over.
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: SkillRequest = serde_json::from_str(trimmed)?;
        invocations += 1;
        let results = format!(
            "{} completed with {} argument(s)",
            request.skill_name,
            request.args.len()
        );
        write_state(&mut writer, invocations, Some(results))?;
    }
}

fn write_state(
    writer: &mut impl Write,
    invocations: u64,
    results: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut env_state = Map::new();
    env_state.insert("invocations".to_string(), json!(invocations));
    let state = WorldState {
        env_state,
        skill_invocation_results: results,
    };
    let line = serde_json::to_string(&state)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
