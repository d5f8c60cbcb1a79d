mod common;

use std::io::Write;
use std::process::{Command, Stdio};

use crate::common::{TestResult, bridge_exe, free_port};

#[test]
fn interactive_session_against_stub_worker() -> TestResult<()> {
    let exe = bridge_exe();
    let port = free_port()?;
    let temp = tempfile::tempdir()?;

    let mut child = Command::new(&exe)
        .arg("--port")
        .arg(port.to_string())
        .arg("--worker-dir")
        .arg(temp.path())
        .arg("--")
        .arg(&exe)
        .arg("stub-worker")
        .arg("--port")
        .arg(port.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let mut stdin = child.stdin.take().ok_or("missing child stdin")?;
        stdin.write_all(b"doThing(1, 'a')\nexit\n")?;
        stdin.flush()?;
    }

    let output = child.wait_with_output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "bridge exited with {}; stderr: {stderr}",
        output.status
    );
    // Startup snapshot, then the post-invocation snapshot with the stub's
    // result text.
    assert!(stdout.contains("\"invocations\": 0"), "stdout: {stdout}");
    assert!(stdout.contains("\"skillInvocationResults\": null"), "stdout: {stdout}");
    assert!(stdout.contains("\"invocations\": 1"), "stdout: {stdout}");
    assert!(
        stdout.contains("doThing completed with 2 argument(s)"),
        "stdout: {stdout}"
    );
    Ok(())
}

#[test]
fn recoverable_parse_error_keeps_the_session_alive() -> TestResult<()> {
    let exe = bridge_exe();
    let port = free_port()?;
    let temp = tempfile::tempdir()?;

    let mut child = Command::new(&exe)
        .arg("--port")
        .arg(port.to_string())
        .arg("--worker-dir")
        .arg(temp.path())
        .arg("--")
        .arg(&exe)
        .arg("stub-worker")
        .arg("--port")
        .arg(port.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let mut stdin = child.stdin.take().ok_or("missing child stdin")?;
        stdin.write_all(b"not a call\nlookAround()\nexit\n")?;
        stdin.flush()?;
    }

    let output = child.wait_with_output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("missing parentheses"),
        "stdout: {stdout}"
    );
    assert!(
        stdout.contains("lookAround completed with 0 argument(s)"),
        "stdout: {stdout}"
    );
    Ok(())
}

#[cfg(target_family = "unix")]
#[test]
fn failing_worker_prints_diagnostics_and_exits_nonzero() -> TestResult<()> {
    let exe = bridge_exe();
    let port = free_port()?;
    let temp = tempfile::tempdir()?;

    let output = Command::new(&exe)
        .arg("--port")
        .arg(port.to_string())
        .arg("--worker-dir")
        .arg(temp.path())
        .arg("--")
        .args(["sh", "-c", "echo boom >&2; exit 1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("boom"), "stderr: {stderr}");
    assert!(stderr.contains("skillbridge:"), "stderr: {stderr}");
    Ok(())
}
