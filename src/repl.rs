use std::io::{BufRead, Write};
use std::path::Path;

use crate::bridge::InvocationBridge;
use crate::error::BridgeError;
use crate::skill_docs;

const PROMPT: &str = "Invoke a skill (or 'exit' to quit or 'skills' to see skills docs): ";

/// The read-print-invoke loop. Input and output sinks are injected so the
/// loop can be driven by a terminal, a script, or a test without touching
/// process-global I/O.
pub fn run(
    mut bridge: InvocationBridge,
    skills_dir: &Path,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<(), BridgeError> {
    let initial = bridge.await_initial_state()?;
    writeln!(output, "{}", initial.readable_string())?;

    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;
        let Some(line) = read_line(input)? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            break;
        }
        if line.eq_ignore_ascii_case("skills") {
            render_skills_docs(skills_dir, output)?;
            continue;
        }

        match bridge.invoke(line) {
            Ok(state) => writeln!(output, "{}", state.readable_string())?,
            // Recoverable: show the message and re-prompt without consuming
            // the turn.
            Err(err) if err.is_recoverable() => writeln!(output, "{err}")?,
            Err(err) => {
                bridge.close();
                return Err(err);
            }
        }
    }

    bridge.close();
    Ok(())
}

fn read_line(reader: &mut impl BufRead) -> Result<Option<String>, BridgeError> {
    let mut line = String::new();
    let bytes = reader.read_line(&mut line)?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn render_skills_docs(skills_dir: &Path, output: &mut impl Write) -> Result<(), BridgeError> {
    match skill_docs::collect_skills_docs(skills_dir) {
        Ok(docs) if docs.is_empty() => {
            writeln!(output, "no skill docs found in {}", skills_dir.display())?;
        }
        Ok(docs) => {
            writeln!(output)?;
            writeln!(output, "{}", docs.join("\n\n"))?;
        }
        Err(err) => writeln!(output, "failed to read skill docs: {err}")?,
    }
    Ok(())
}
