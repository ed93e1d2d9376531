use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::executor::CommandOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Out,
    Err,
}

/// Everything captured while one command ran on one host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub host: String,
    pub command: String,
    #[serde(skip)]
    pub stdout: Vec<u8>,
    #[serde(skip)]
    pub stderr: Vec<u8>,
    pub outcome: Option<CommandOutcome>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionRecord {
    fn new(host: &str, command: &str) -> Self {
        Self {
            host: host.to_string(),
            command: command.to_string(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            outcome: None,
            started_at: Utc::now(),
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Legacy integer view of the outcome: `-1` when no exit code exists.
    pub fn exit_code(&self) -> i32 {
        self.outcome.as_ref().map_or(-1, CommandOutcome::exit_code)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(CommandOutcome::is_success)
    }
}

/// Capture buffer reused for every command run on one host.
#[derive(Debug, Clone)]
pub struct ExecutionRecorder {
    record: ExecutionRecord,
}

impl ExecutionRecorder {
    pub fn new(host: &str) -> Self {
        Self {
            record: ExecutionRecord::new(host, ""),
        }
    }

    /// Clear the buffers and start recording `command`.
    pub fn reset(&mut self, command: &str) {
        self.record = ExecutionRecord::new(&self.record.host, command);
    }

    pub fn log(&mut self, stream: OutputStream, bytes: &[u8]) {
        match stream {
            OutputStream::Out => self.record.stdout.extend_from_slice(bytes),
            OutputStream::Err => self.record.stderr.extend_from_slice(bytes),
        }
    }

    pub fn finish(&mut self, outcome: CommandOutcome) {
        self.record.outcome = Some(outcome);
    }

    pub fn record(&self) -> &ExecutionRecord {
        &self.record
    }

    pub fn into_record(self) -> ExecutionRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_appends_to_the_matching_buffer() {
        let mut recorder = ExecutionRecorder::new("a.example.com");
        recorder.reset("echo hi");
        recorder.log(OutputStream::Out, b"h");
        recorder.log(OutputStream::Out, b"i\n");
        recorder.log(OutputStream::Err, b"warn\n");

        let record = recorder.record();
        assert_eq!(record.stdout_lossy(), "hi\n");
        assert_eq!(record.stderr_lossy(), "warn\n");
        assert_eq!(record.command, "echo hi");
        assert_eq!(record.host, "a.example.com");
    }

    #[test]
    fn reset_clears_previous_command() {
        let mut recorder = ExecutionRecorder::new("a.example.com");
        recorder.reset("first");
        recorder.log(OutputStream::Out, b"old");
        recorder.finish(CommandOutcome::Completed(0));

        recorder.reset("second");

        let record = recorder.record();
        assert_eq!(record.command, "second");
        assert!(record.stdout.is_empty());
        assert!(record.outcome.is_none());
        assert_eq!(record.host, "a.example.com");
    }

    #[test]
    fn exit_code_uses_sentinel_without_status() {
        let mut recorder = ExecutionRecorder::new("a.example.com");
        recorder.reset("true");
        assert_eq!(recorder.record().exit_code(), -1);

        recorder.finish(CommandOutcome::DispatchFailed("no channel".to_string()));
        assert_eq!(recorder.record().exit_code(), -1);
        assert!(!recorder.record().succeeded());

        recorder.finish(CommandOutcome::Completed(0));
        assert!(recorder.into_record().succeeded());
    }
}
