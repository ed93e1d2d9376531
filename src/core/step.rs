use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::shell;

/// One entry of an install or verify sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStep {
    /// Shell text dispatched to the remote host as-is.
    Shell(String),
    /// Upload the installer's transfer source to its destination.
    Transfer,
    /// Close the host's session and open a fresh one (new login shell).
    Reconnect,
}

impl CommandStep {
    pub fn shell(command: impl Into<String>) -> Self {
        CommandStep::Shell(command.into())
    }
}

impl From<&str> for CommandStep {
    fn from(command: &str) -> Self {
        CommandStep::Shell(command.to_string())
    }
}

impl From<String> for CommandStep {
    fn from(command: String) -> Self {
        CommandStep::Shell(command)
    }
}

/// Local artifact and remote destination for a `Transfer` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSpec {
    pub source: PathBuf,
    pub destination: String,
    #[serde(default)]
    pub recursive: bool,
}

impl TransferSpec {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            recursive: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

/// Prefix every shell step with `sudo_command` unless it already has it.
///
/// Markers pass through untouched. Applying this twice gives the same result
/// as applying it once.
pub fn wrap_sudo(steps: &[CommandStep], sudo_command: &str) -> Vec<CommandStep> {
    steps
        .iter()
        .map(|step| match step {
            CommandStep::Shell(command) if !shell::starts_with_word(command, sudo_command) => {
                CommandStep::Shell(format!("{} {}", sudo_command, command))
            }
            other => other.clone(),
        })
        .collect()
}

/// Join verification checks into the single command run on each host.
pub fn composite_command<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_plain_commands() {
        let wrapped = wrap_sudo(&["apt-get install x".into()], "sudo");
        assert_eq!(wrapped, vec![CommandStep::shell("sudo apt-get install x")]);
    }

    #[test]
    fn leaves_sudo_commands_alone() {
        let steps = vec![CommandStep::shell("sudo apt-get install x")];
        assert_eq!(wrap_sudo(&steps, "sudo"), steps);
    }

    #[test]
    fn wrapping_is_idempotent() {
        let steps = vec![
            CommandStep::shell("echo hi"),
            CommandStep::Transfer,
            CommandStep::shell("sudo -u app make"),
            CommandStep::Reconnect,
        ];
        let once = wrap_sudo(&steps, "sudo");
        assert_eq!(wrap_sudo(&once, "sudo"), once);
    }

    #[test]
    fn markers_are_never_altered() {
        let steps = vec![CommandStep::Transfer, CommandStep::Reconnect];
        assert_eq!(wrap_sudo(&steps, "sudo"), steps);
    }

    #[test]
    fn sudo_prefix_must_be_a_whole_word() {
        let wrapped = wrap_sudo(&["sudoedit /etc/hosts".into()], "sudo");
        assert_eq!(wrapped, vec![CommandStep::shell("sudo sudoedit /etc/hosts")]);
    }

    #[test]
    fn composite_joins_with_and() {
        assert_eq!(
            composite_command(&["test -f /a", "test -d /b"]),
            "test -f /a && test -d /b"
        );
        assert_eq!(composite_command::<&str>(&[]), "");
    }
}
