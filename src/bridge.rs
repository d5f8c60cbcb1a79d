use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::channel::{ChannelError, MessageChannel};
use crate::config::WorkerConfig;
use crate::error::BridgeError;
use crate::event_log;
use crate::invocation;
use crate::protocol::{SkillRequest, WorldState};
use crate::supervisor::{ProcessSupervisor, SHUTDOWN_TIMEOUT};

/// How long a receive attempt blocks before the worker's liveness is
/// re-validated. A crashed worker is detected within one interval instead of
/// hanging a blocking receive forever.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    AwaitingInitialState,
    Idle,
    AwaitingReply,
    Closed,
}

/// Owns the worker process and the message channel to it for one session.
/// At most one request is in flight; teardown always closes the channel
/// before the process, on every path.
pub struct InvocationBridge {
    supervisor: ProcessSupervisor,
    channel: Option<MessageChannel>,
    state: BridgeState,
    last_state: Option<WorldState>,
}

impl InvocationBridge {
    /// Starts the worker (optionally rebuilding it first) and dials its
    /// channel address. The worker is expected to push one unsolicited state
    /// message once up; consume it with [`await_initial_state`].
    ///
    /// [`await_initial_state`]: InvocationBridge::await_initial_state
    pub fn connect(config: &WorkerConfig, rebuild: bool) -> Result<Self, BridgeError> {
        let mut supervisor = ProcessSupervisor::start(config, rebuild)?;
        let channel = match dial_worker(&mut supervisor, config) {
            Ok(channel) => channel,
            Err(err) => {
                supervisor.note_expected_exit();
                supervisor.shutdown(SHUTDOWN_TIMEOUT);
                return Err(err);
            }
        };
        Ok(Self {
            supervisor,
            channel: Some(channel),
            state: BridgeState::AwaitingInitialState,
            last_state: None,
        })
    }

    pub fn await_initial_state(&mut self) -> Result<&WorldState, BridgeError> {
        match self.state {
            BridgeState::Closed => {
                return Err(BridgeError::Usage("bridge is closed".to_string()));
            }
            BridgeState::AwaitingReply => {
                return Err(BridgeError::Usage(
                    "a request is already outstanding".to_string(),
                ));
            }
            BridgeState::AwaitingInitialState => {
                let state = self.receive_state_or_teardown()?;
                event_log::log("state_received", json!({"initial": true}));
                self.last_state = Some(state);
                self.state = BridgeState::Idle;
            }
            BridgeState::Idle => {}
        }
        self.current_state()
    }

    /// Parses the textual invocation, sends it, and waits for the worker's
    /// next state message. Parse failures are recoverable and leave the
    /// bridge untouched; the caller may retry with corrected text.
    pub fn invoke(&mut self, text: &str) -> Result<&WorldState, BridgeError> {
        let parsed = invocation::parse(text)?;
        match self.state {
            BridgeState::Idle => {}
            BridgeState::AwaitingInitialState => {
                return Err(BridgeError::Usage(
                    "initial worker state has not arrived yet".to_string(),
                ));
            }
            BridgeState::AwaitingReply => {
                return Err(BridgeError::Usage(
                    "a request is already outstanding".to_string(),
                ));
            }
            BridgeState::Closed => {
                return Err(BridgeError::Usage("bridge is closed".to_string()));
            }
        }

        let request = SkillRequest::from_invocation(parsed);
        event_log::log(
            "invoke",
            json!({"skill": request.skill_name, "arg_count": request.args.len()}),
        );

        self.state = BridgeState::AwaitingReply;
        let sent = match self.channel.as_ref() {
            Some(channel) => channel.send(&request),
            None => Err(ChannelError::Disconnected),
        };
        if let Err(err) = sent {
            self.close();
            return Err(err.into());
        }

        let state = self.receive_state_or_teardown()?;
        event_log::log(
            "state_received",
            json!({"initial": false, "has_result": state.skill_invocation_results.is_some()}),
        );
        self.last_state = Some(state);
        self.state = BridgeState::Idle;
        self.current_state()
    }

    pub fn last_state(&self) -> Option<&WorldState> {
        self.last_state.as_ref()
    }

    /// Idempotent teardown: channel first so no further receive touches a
    /// stale transport, then graceful-then-forced process shutdown.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if self.state != BridgeState::Closed {
            self.state = BridgeState::Closed;
            self.supervisor.note_expected_exit();
            self.supervisor.shutdown(SHUTDOWN_TIMEOUT);
            event_log::log("bridge_closed", json!({}));
        }
    }

    fn current_state(&self) -> Result<&WorldState, BridgeError> {
        self.last_state
            .as_ref()
            .ok_or_else(|| BridgeError::Usage("no worker state received yet".to_string()))
    }

    fn receive_state_or_teardown(&mut self) -> Result<WorldState, BridgeError> {
        match self.receive_state() {
            Ok(state) => Ok(state),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    // Poll receive with a liveness check on every timeout, so a worker that
    // dies without replying surfaces as a crash within one poll interval.
    fn receive_state(&mut self) -> Result<WorldState, BridgeError> {
        loop {
            let Some(channel) = self.channel.as_ref() else {
                return Err(BridgeError::Usage("bridge is closed".to_string()));
            };
            match channel.try_receive(POLL_INTERVAL) {
                Ok(Some(state)) => return Ok(state),
                Ok(None) => self.supervisor.check_liveness()?,
                Err(ChannelError::Disconnected) => {
                    // Give a dying worker one interval to become observable
                    // so the failure is reported as a crash, not a bare
                    // disconnect.
                    thread::sleep(POLL_INTERVAL);
                    self.supervisor.check_liveness()?;
                    return Err(BridgeError::Protocol(
                        "worker closed the channel before replying".to_string(),
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for InvocationBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn dial_worker(
    supervisor: &mut ProcessSupervisor,
    config: &WorkerConfig,
) -> Result<MessageChannel, BridgeError> {
    let address = config.address();
    let deadline = Instant::now() + CONNECT_WAIT;
    loop {
        supervisor.check_liveness()?;
        match MessageChannel::connect(address) {
            Ok(channel) => {
                event_log::log("channel_connect", json!({"address": address.to_string()}));
                return Ok(channel);
            }
            Err(err) => {
                if Instant::now() >= deadline {
                    return Err(BridgeError::Startup {
                        status: None,
                        stderr: supervisor.stderr_contents(),
                        message: format!(
                            "worker did not open {address} within {}s: {err}",
                            CONNECT_WAIT.as_secs()
                        ),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}
