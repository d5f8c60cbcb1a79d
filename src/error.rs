use std::io;
use std::process::ExitStatus;

use crate::channel::ChannelError;
use crate::invocation::ParseError;

/// Session-level error taxonomy. `InvalidInvocation` and `Usage` are
/// recoverable at the loop boundary; everything else is fatal to the session
/// and unwinds through the bridge's teardown.
#[derive(Debug)]
pub enum BridgeError {
    InvalidInvocation(ParseError),
    Usage(String),
    Build {
        status: ExitStatus,
        stderr: String,
    },
    Startup {
        status: Option<ExitStatus>,
        stderr: String,
        message: String,
    },
    Crashed {
        status: ExitStatus,
        stderr: String,
    },
    Protocol(String),
    Io(io::Error),
}

impl BridgeError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidInvocation(_) | BridgeError::Usage(_)
        )
    }

    /// Captured worker diagnostics, surfaced by the top-level error boundary
    /// on fatal failures.
    pub fn worker_stderr(&self) -> Option<&str> {
        let stderr = match self {
            BridgeError::Build { stderr, .. }
            | BridgeError::Startup { stderr, .. }
            | BridgeError::Crashed { stderr, .. } => stderr,
            _ => return None,
        };
        let trimmed = stderr.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::InvalidInvocation(err) => write!(f, "{err}"),
            BridgeError::Usage(message) => write!(f, "usage error: {message}"),
            BridgeError::Build { status, .. } => {
                write!(f, "worker build step failed with {status}")
            }
            BridgeError::Startup { message, .. } => write!(f, "worker startup failed: {message}"),
            BridgeError::Crashed { status, .. } => {
                write!(f, "worker process exited unexpectedly with {status}")
            }
            BridgeError::Protocol(message) => write!(f, "protocol error: {message}"),
            BridgeError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::InvalidInvocation(err) => Some(err),
            BridgeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        BridgeError::Io(err)
    }
}

impl From<ParseError> for BridgeError {
    fn from(err: ParseError) -> Self {
        BridgeError::InvalidInvocation(err)
    }
}

impl From<ChannelError> for BridgeError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Disconnected => {
                BridgeError::Protocol("channel closed by peer".to_string())
            }
            ChannelError::Protocol(message) => BridgeError::Protocol(message),
            ChannelError::Io(err) => BridgeError::Io(err),
        }
    }
}
