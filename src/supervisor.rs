use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(target_family = "unix")]
use std::collections::{HashMap, HashSet};
#[cfg(target_family = "unix")]
use std::os::unix::process::CommandExt;

#[cfg(target_family = "unix")]
use sysinfo::{Pid, ProcessesToUpdate, System};

use serde_json::json;

use crate::config::WorkerConfig;
use crate::error::BridgeError;
use crate::event_log;

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const FORCE_KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
struct StderrCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl StderrCapture {
    fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Owns the worker OS process for one bridge session. Terminal once the
/// process has exited; create a new supervisor to restart the worker.
pub struct ProcessSupervisor {
    child: Child,
    stderr: StderrCapture,
    stderr_reader: Option<JoinHandle<()>>,
    exit_status: Option<ExitStatus>,
    expected_exit: bool,
}

impl ProcessSupervisor {
    /// Optionally runs the worker's synchronous build step, then spawns the
    /// worker with stderr captured. Fails fast if the process is already
    /// gone on the first non-blocking poll.
    pub fn start(config: &WorkerConfig, rebuild: bool) -> Result<Self, BridgeError> {
        if rebuild {
            run_build_step(config)?;
        }

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .current_dir(&config.worker_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // The worker may spawn helpers of its own; a fresh process group
        // lets shutdown signal all of them at once.
        #[cfg(target_family = "unix")]
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|err| BridgeError::Startup {
            status: None,
            stderr: String::new(),
            message: format!("failed to spawn {}: {err}", config.program),
        })?;

        let stderr = StderrCapture::default();
        let stderr_reader = spawn_stderr_reader(child.stderr.take(), stderr.clone());
        let mut supervisor = Self {
            child,
            stderr,
            stderr_reader,
            exit_status: None,
            expected_exit: false,
        };

        event_log::log(
            "worker_spawn",
            json!({
                "pid": supervisor.child.id(),
                "program": config.program,
                "worker_dir": config.worker_dir.to_string_lossy(),
            }),
        );

        if let Some(status) = supervisor.poll_exit()? {
            supervisor.join_stderr_reader();
            return Err(BridgeError::Startup {
                status: Some(status),
                stderr: supervisor.stderr.contents(),
                message: format!("worker process exited immediately with {status}"),
            });
        }

        Ok(supervisor)
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn stderr_contents(&self) -> String {
        self.stderr.contents()
    }

    /// Marks the upcoming exit as deliberate so it is not classified as a
    /// crash in the debug event stream.
    pub fn note_expected_exit(&mut self) {
        self.expected_exit = true;
    }

    /// Non-blocking liveness poll. Any exit observed here (or earlier) is a
    /// crash from the bridge's point of view.
    pub fn check_liveness(&mut self) -> Result<(), BridgeError> {
        match self.poll_exit()? {
            Some(status) => Err(BridgeError::Crashed {
                status,
                stderr: self.stderr.contents(),
            }),
            None => Ok(()),
        }
    }

    /// Graceful-then-forced termination. No-op when the process already
    /// exited; idempotent; safe on cleanup paths after prior failures.
    pub fn shutdown(&mut self, timeout: Duration) {
        if let Ok(Some(_)) = self.poll_exit() {
            return;
        }

        self.send_term_signal();
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(_)) = self.poll_exit() {
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        self.send_kill_signal();
        let force_deadline = Instant::now() + FORCE_KILL_GRACE;
        loop {
            if let Ok(Some(_)) = self.poll_exit() {
                return;
            }
            if Instant::now() >= force_deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        if let Ok(status) = self.child.wait() {
            self.record_exit(status);
        }
    }

    fn poll_exit(&mut self) -> Result<Option<ExitStatus>, BridgeError> {
        if self.exit_status.is_none()
            && let Some(status) = self.child.try_wait()?
        {
            self.record_exit(status);
        }
        Ok(self.exit_status)
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if self.exit_status.is_some() {
            return;
        }
        self.exit_status = Some(status);
        self.join_stderr_reader();
        event_log::log(
            "worker_exit",
            json!({
                "status": status.to_string(),
                "expected": self.expected_exit,
            }),
        );
    }

    // Once the process has exited its write end is closed, so the reader
    // drains to EOF and the captured stderr is complete.
    fn join_stderr_reader(&mut self) {
        if let Some(handle) = self.stderr_reader.take() {
            let _ = handle.join();
        }
    }

    #[cfg(target_family = "unix")]
    fn send_signal(&self, signal: i32) -> bool {
        let pid = self.child.id() as i32;
        let result = unsafe { libc::kill(-pid, signal) };
        if result == 0 {
            return true;
        }
        // If the process group is already gone, we're done.
        std::io::Error::last_os_error().kind() == std::io::ErrorKind::NotFound
    }

    fn send_term_signal(&mut self) {
        #[cfg(target_family = "unix")]
        if !self.send_signal(libc::SIGTERM) {
            self.kill_process_tree_scan(libc::SIGTERM);
        }
        #[cfg(not(target_family = "unix"))]
        {
            let _ = self.child.kill();
        }
    }

    fn send_kill_signal(&mut self) {
        #[cfg(target_family = "unix")]
        if !self.send_signal(libc::SIGKILL) {
            self.kill_process_tree_scan(libc::SIGKILL);
        }
        #[cfg(not(target_family = "unix"))]
        {
            let _ = self.child.kill();
        }
    }

    // Fallback when the group signal fails: walk the process table and
    // signal every descendant individually.
    #[cfg(target_family = "unix")]
    fn kill_process_tree_scan(&self, signal: i32) {
        let root = Pid::from_u32(self.child.id());
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (proc_pid, process) in system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*proc_pid);
            }
        }

        let mut stack = vec![root];
        let mut seen: HashSet<Pid> = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(kids) = children.get(&current) {
                for child in kids {
                    if !seen.contains(child) {
                        stack.push(*child);
                    }
                }
            }
        }

        for pid in seen {
            let _ = unsafe { libc::kill(pid.as_u32() as i32, signal) };
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown(SHUTDOWN_TIMEOUT);
    }
}

fn spawn_stderr_reader<R>(stream: Option<R>, capture: StderrCapture) -> Option<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let Some(mut stream) = stream else {
        return None;
    };
    Some(thread::spawn(move || {
        let mut buffer = [0u8; 8192];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let mut guard = capture.buffer.lock().unwrap();
                    guard.extend_from_slice(&buffer[..n]);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }))
}

fn run_build_step(config: &WorkerConfig) -> Result<(), BridgeError> {
    let output = Command::new(&config.build_program)
        .args(&config.build_args)
        .current_dir(&config.worker_dir)
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(BridgeError::Build {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
