use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{Value as JsonValue, json};

pub const DEBUG_EVENTS_DIR_ENV: &str = "SKILLBRIDGE_DEBUG_EVENTS_DIR";

static SINK: OnceLock<Option<EventSink>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct StartupContext {
    pub worker_program: String,
    pub worker_dir: String,
    pub port: u16,
    pub rebuild: bool,
}

/// Opt-in JSONL event sink. One file per bridge session; every line carries a
/// monotonic sequence number so interleaved sessions in the same directory
/// stay attributable.
#[derive(Debug)]
struct EventSink {
    state: Mutex<SinkState>,
    path: PathBuf,
    session: String,
    started: Instant,
}

#[derive(Debug)]
struct SinkState {
    file: File,
    seq: u64,
}

impl EventSink {
    fn open(dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        fs::create_dir_all(dir)?;
        let session = format!("skillbridge-{}-{}", epoch_ms(), std::process::id());
        let (file, path) = open_unique_file(dir, &session)?;
        Ok(Self {
            state: Mutex::new(SinkState { file, seq: 0 }),
            path,
            session,
            started: Instant::now(),
        })
    }

    fn emit(&self, event: &str, data: JsonValue) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("event sink mutex poisoned");
        state.seq += 1;
        let line = json!({
            "ts_unix_ms": epoch_ms(),
            "uptime_ms": self.started.elapsed().as_millis(),
            "seq": state.seq,
            "session": self.session,
            "event": event,
            "data": data,
        });
        writeln!(state.file, "{line}")?;
        state.file.flush()
    }
}

/// Enables the debug event log when a directory is configured via flag or env
/// var; otherwise logging stays off and [`log`] is a no-op.
pub fn initialize(
    debug_events_dir: Option<PathBuf>,
    context: StartupContext,
) -> Result<(), Box<dyn std::error::Error>> {
    if SINK.get().is_some() {
        return Ok(());
    }
    let sink = match resolve_debug_dir(debug_events_dir) {
        Some(dir) => {
            let sink = EventSink::open(&dir)?;
            sink.emit("startup", startup_data(&context, &sink.path))?;
            Some(sink)
        }
        None => None,
    };
    let _ = SINK.set(sink);
    Ok(())
}

pub fn log(event: &str, data: JsonValue) {
    if let Some(Some(sink)) = SINK.get() {
        let _ = sink.emit(event, data);
    }
}

fn resolve_debug_dir(debug_events_dir: Option<PathBuf>) -> Option<PathBuf> {
    debug_events_dir
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| {
            std::env::var_os(DEBUG_EVENTS_DIR_ENV)
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from)
        })
}

fn startup_data(context: &StartupContext, path: &Path) -> JsonValue {
    json!({
        "worker_program": context.worker_program,
        "worker_dir": context.worker_dir,
        "port": context.port,
        "rebuild": context.rebuild,
        "pid": std::process::id(),
        "cwd": std::env::current_dir().ok().map(|cwd| cwd.to_string_lossy().to_string()),
        "argv": std::env::args().collect::<Vec<_>>(),
        "log_file": path.to_string_lossy().to_string(),
        "env": bridge_env_snapshot(std::env::vars()),
    })
}

// Only the bridge's own namespace is recorded, and never anything that looks
// like a credential.
fn bridge_env_snapshot<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(key, _)| key.starts_with("SKILLBRIDGE_") && !looks_sensitive(key))
        .collect()
}

fn looks_sensitive(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["KEY", "TOKEN", "SECRET", "PASSWORD"]
        .iter()
        .any(|needle| upper.contains(needle))
}

fn open_unique_file(
    dir: &Path,
    session: &str,
) -> Result<(File, PathBuf), Box<dyn std::error::Error>> {
    for attempt in 0u32..1_000 {
        let name = match attempt {
            0 => format!("{session}.jsonl"),
            n => format!("{session}-{n}.jsonl"),
        };
        let path = dir.join(name);
        match OpenOptions::new().create_new(true).append(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(Box::new(err)),
        }
    }
    Err("failed to allocate unique event log filename after 1000 attempts".into())
}

fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_snapshot_keeps_bridge_vars_and_drops_credentials() {
        let env = vec![
            ("SKILLBRIDGE_PORT".to_string(), "5556".to_string()),
            ("SKILLBRIDGE_WORKER_DIR".to_string(), "/opt/w".to_string()),
            ("SKILLBRIDGE_API_KEY".to_string(), "redacted".to_string()),
            ("OTHER_VAR".to_string(), "ignored".to_string()),
        ];
        let snapshot = bridge_env_snapshot(env);
        assert_eq!(snapshot.get("SKILLBRIDGE_PORT"), Some(&"5556".to_string()));
        assert_eq!(
            snapshot.get("SKILLBRIDGE_WORKER_DIR"),
            Some(&"/opt/w".to_string())
        );
        assert!(!snapshot.contains_key("SKILLBRIDGE_API_KEY"));
        assert!(!snapshot.contains_key("OTHER_VAR"));
    }

    #[test]
    fn events_are_written_as_json_lines_with_sequence_numbers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = EventSink::open(temp.path()).expect("open sink");
        sink.emit("first", json!({"ok": true})).expect("emit");
        sink.emit("second", json!({})).expect("emit");
        let text = std::fs::read_to_string(&sink.path).expect("read event log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"first\""));
        assert!(lines[0].contains("\"seq\":1"));
        assert!(lines[1].contains("\"event\":\"second\""));
        assert!(lines[1].contains("\"seq\":2"));
    }

    #[test]
    fn filename_collision_gets_a_numbered_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("skillbridge-1-2.jsonl"), "{}\n").expect("seed");

        let (_file, path) =
            open_unique_file(temp.path(), "skillbridge-1-2").expect("allocate second path");
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("skillbridge-1-2-1.jsonl")
        );
    }
}
