use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use skillbridge::bridge::InvocationBridge;
use skillbridge::config::{self, WorkerConfig};
use skillbridge::error::BridgeError;
use skillbridge::event_log;
use skillbridge::repl;
use skillbridge::stub_worker;

enum CliCommand {
    RunBridge(CliOptions),
    RunStubWorker { port: u16 },
}

struct CliOptions {
    worker_dir: Option<PathBuf>,
    port: Option<u16>,
    rebuild: bool,
    debug_events_dir: Option<PathBuf>,
    worker_command: Option<Vec<String>>,
}

fn main() -> ExitCode {
    #[cfg(target_family = "unix")]
    // The worker shares our terminal lifetime; if a downstream reader closes
    // its end, writes would raise SIGPIPE and kill the process on Unix.
    // Ignore it so broken pipes surface as normal write errors.
    ignore_sigpipe();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_fatal(err.as_ref());
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_family = "unix")]
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    match parse_cli_args()? {
        CliCommand::RunStubWorker { port } => stub_worker::run(port),
        CliCommand::RunBridge(options) => run_bridge(options),
    }
}

fn run_bridge(options: CliOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&options)?;
    event_log::initialize(
        options.debug_events_dir.clone(),
        event_log::StartupContext {
            worker_program: config.program.clone(),
            worker_dir: config.worker_dir.to_string_lossy().to_string(),
            port: config.port,
            rebuild: options.rebuild,
        },
    )?;

    let bridge = InvocationBridge::connect(&config, options.rebuild)?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    repl::run(bridge, &config.skills_dir, &mut input, &mut output)?;
    Ok(())
}

// Single error boundary: fatal errors print any captured worker diagnostics
// before the taxonomy message, then the process exits non-zero.
fn report_fatal(err: &(dyn std::error::Error + 'static)) {
    if let Some(bridge_err) = err.downcast_ref::<BridgeError>()
        && let Some(stderr) = bridge_err.worker_stderr()
    {
        eprintln!("{stderr}");
    }
    eprintln!("skillbridge: {err}");
}

fn build_config(options: &CliOptions) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let worker_dir = options
        .worker_dir
        .clone()
        .or_else(config::worker_dir_from_env)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = WorkerConfig::for_worker_dir(worker_dir);
    if let Some(port) = options.port {
        config.port = port;
    } else if let Some(port) = config::port_from_env()? {
        config.port = port;
    }
    if let Some(command) = &options.worker_command {
        config.program = command[0].clone();
        config.args = command[1..].to_vec();
    }
    Ok(config)
}

fn parse_cli_args() -> Result<CliCommand, Box<dyn std::error::Error>> {
    let mut parser = ArgParser::new();
    if let Some(arg) = parser.peek()
        && arg == stub_worker::STUB_WORKER_MODE_ARG
    {
        parser.next();
        let port = parse_stub_worker_args(&mut parser)?;
        return Ok(CliCommand::RunStubWorker { port });
    }

    let mut options = CliOptions {
        worker_dir: None,
        port: None,
        rebuild: false,
        debug_events_dir: None,
        worker_command: None,
    };
    while let Some(arg) = parser.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--rebuild" => options.rebuild = true,
            "--worker-dir" => {
                options.worker_dir = Some(PathBuf::from(parser.next_value("--worker-dir")?));
            }
            _ if arg.starts_with("--worker-dir=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.is_empty() {
                    return Err("missing value for --worker-dir".into());
                }
                options.worker_dir = Some(PathBuf::from(value));
            }
            "--port" => {
                options.port = Some(config::parse_port(&parser.next_value("--port")?)?);
            }
            _ if arg.starts_with("--port=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.is_empty() {
                    return Err("missing value for --port".into());
                }
                options.port = Some(config::parse_port(value)?);
            }
            "--debug-events-dir" => {
                let value = parser.next_value("--debug-events-dir")?;
                if value.trim().is_empty() {
                    return Err("missing value for --debug-events-dir".into());
                }
                options.debug_events_dir = Some(PathBuf::from(value));
            }
            _ if arg.starts_with("--debug-events-dir=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.trim().is_empty() {
                    return Err("missing value for --debug-events-dir".into());
                }
                options.debug_events_dir = Some(PathBuf::from(value));
            }
            "--" => {
                let command = parser.rest();
                if command.is_empty() {
                    return Err("missing worker command after --".into());
                }
                options.worker_command = Some(command);
                break;
            }
            _ => return Err(format!("unknown argument: {arg}").into()),
        }
    }
    Ok(CliCommand::RunBridge(options))
}

fn parse_stub_worker_args(parser: &mut ArgParser) -> Result<u16, Box<dyn std::error::Error>> {
    let mut port = config::port_from_env()?.unwrap_or(config::DEFAULT_PORT);
    while let Some(arg) = parser.next() {
        match arg.as_str() {
            "--port" => port = config::parse_port(&parser.next_value("--port")?)?,
            _ if arg.starts_with("--port=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.is_empty() {
                    return Err("missing value for --port".into());
                }
                port = config::parse_port(value)?;
            }
            _ => return Err(format!("unknown argument: {arg}").into()),
        }
    }
    Ok(port)
}

fn print_usage() {
    println!("Usage: skillbridge [OPTIONS] [-- WORKER_COMMAND...]");
    println!();
    println!("Options:");
    println!(
        "  --worker-dir <DIR>        worker working directory (default: ., env {})",
        config::WORKER_DIR_ENV
    );
    println!(
        "  --port <PORT>             channel port (default: {}, env {})",
        config::DEFAULT_PORT,
        config::WORKER_PORT_ENV
    );
    println!("  --rebuild                 run the worker's build step before starting it");
    println!("  --debug-events-dir <DIR>  write a JSONL debug event log into DIR");
    println!("  -h, --help                show this help");
    println!();
    println!("  -- WORKER_COMMAND...      override the worker launch command");
    println!();
    println!("Subcommands:");
    println!("  stub-worker [--port <PORT>]   run the built-in stub worker (for tests)");
}

struct ArgParser {
    args: std::collections::VecDeque<String>,
}

impl ArgParser {
    fn new() -> Self {
        Self {
            args: std::env::args().skip(1).collect(),
        }
    }

    fn next(&mut self) -> Option<String> {
        self.args.pop_front()
    }

    fn peek(&self) -> Option<&str> {
        self.args.front().map(String::as_str)
    }

    fn next_value(&mut self, flag: &str) -> Result<String, Box<dyn std::error::Error>> {
        self.next()
            .ok_or_else(|| format!("missing value for {flag}").into())
    }

    fn rest(&mut self) -> Vec<String> {
        self.args.drain(..).collect()
    }
}
