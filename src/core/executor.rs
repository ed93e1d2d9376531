use serde::Serialize;

use crate::recorder::{ExecutionRecorder, OutputStream};
use crate::ssh::{ChannelEvent, Session};
use crate::utils::color;

/// How a remote command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The remote side reported an exit status.
    Completed(i32),
    /// The command never started.
    DispatchFailed(String),
    /// The channel closed without an exit status.
    Terminated(String),
}

impl CommandOutcome {
    /// Exit code for `Completed`, `-1` for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandOutcome::Completed(code) => *code,
            _ => -1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Completed(0))
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Completed(_) => "completed",
            CommandOutcome::DispatchFailed(_) => "dispatch_failed",
            CommandOutcome::Terminated(_) => "terminated",
        }
    }
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutcome::Completed(code) => write!(f, "exit code {}", code),
            CommandOutcome::DispatchFailed(cause) => write!(f, "not dispatched: {}", cause),
            CommandOutcome::Terminated(reason) => write!(f, "terminated: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Dispatching,
    StreamingOutput,
    AwaitingExitStatus,
    Closed,
}

/// Run `command` on `session`, recording output into `recorder`.
///
/// Blocks until the channel closes. The recorder is reset first and holds
/// the outcome on return.
pub fn run(
    session: &mut dyn Session,
    command: &str,
    recorder: &mut ExecutionRecorder,
) -> CommandOutcome {
    recorder.reset(command);
    let host = session.host().to_string();

    let mut state = ChannelState::Dispatching;
    log_debug!("exec", "{}: {}", host, color::blue(command));

    let mut channel = match session.exec(command) {
        Ok(channel) => channel,
        Err(e) => {
            log_error!("exec", "{}: couldn't run remote command: {}", host, e);
            let outcome = CommandOutcome::DispatchFailed(e.message);
            recorder.finish(outcome.clone());
            return outcome;
        }
    };

    state = advance(state, ChannelState::StreamingOutput);
    let mut exit: Option<CommandOutcome> = None;

    while state != ChannelState::Closed {
        let Some(event) = channel.next() else {
            state = advance(state, ChannelState::Closed);
            continue;
        };

        match event {
            ChannelEvent::Stdout(bytes) => {
                log_debug!("exec", "{}", color::yellow(&chunk_line(&host, &bytes)));
                recorder.log(OutputStream::Out, &bytes);
            }
            ChannelEvent::Stderr(bytes) => {
                log_debug!("exec", "{}", color::red(&chunk_line(&host, &bytes)));
                recorder.log(OutputStream::Err, &bytes);
            }
            ChannelEvent::Eof => {
                state = advance(state, ChannelState::AwaitingExitStatus);
            }
            ChannelEvent::ExitStatus(code) => {
                if code == 0 {
                    log_debug!("exec", "{}: {}", host, color::green("success"));
                } else {
                    let failed = format!("failed ({})", code);
                    log_debug!("exec", "{}: {}", host, color::red(&failed));
                }
                exit = Some(CommandOutcome::Completed(code));
            }
            ChannelEvent::ExitSignal(signal) => {
                let killed = format!("killed by {}", signal);
                log_debug!("exec", "{}: {}", host, color::red(&killed));
                if exit.is_none() {
                    exit = Some(CommandOutcome::Terminated(signal));
                }
            }
        }
    }

    let outcome = exit.unwrap_or_else(|| {
        CommandOutcome::Terminated("channel closed without exit status".to_string())
    });
    recorder.finish(outcome.clone());
    outcome
}

/// One output chunk as a debug line, tagged with the host it came from.
fn chunk_line(host: &str, bytes: &[u8]) -> String {
    format!("[{}] {}", host, String::from_utf8_lossy(bytes).trim_end())
}

// Late output after Eof is tolerated; the state never moves backwards.
fn advance(current: ChannelState, next: ChannelState) -> ChannelState {
    match (current, next) {
        (ChannelState::Closed, _) => ChannelState::Closed,
        (ChannelState::AwaitingExitStatus, ChannelState::StreamingOutput) => current,
        _ => next,
    }
}
