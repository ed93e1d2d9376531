//! Collaborators that supply the steps a sequencer runs.

use crate::step::{CommandStep, TransferSpec};

/// A package whose install steps are run on every host of a role.
pub trait Installer {
    fn package_name(&self) -> &str;

    fn install_sequence(&self) -> Vec<CommandStep>;

    /// Artifact uploaded whenever the sequence reaches a `Transfer` step.
    fn transfer(&self) -> Option<&TransferSpec> {
        None
    }
}

/// A package whose presence is checked on every host of a role.
pub trait Verifier {
    fn package_name(&self) -> &str;

    fn commands(&self) -> Vec<String>;
}

/// Installer assembled step by step.
///
/// ```ignore
/// let nginx = Sequence::new("nginx")
///     .command("apt-get install -y nginx")
///     .transfer(TransferSpec::new("dist/site.conf", "/etc/nginx/sites-enabled/"))
///     .command("systemctl reload nginx");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    name: String,
    steps: Vec<CommandStep>,
    transfer: Option<TransferSpec>,
}

impl Sequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            transfer: None,
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.steps.push(CommandStep::Shell(command.into()));
        self
    }

    /// Add a `Transfer` step. The last `TransferSpec` given is the one every
    /// `Transfer` step of this sequence uploads.
    pub fn transfer(mut self, spec: TransferSpec) -> Self {
        self.transfer = Some(spec);
        self.steps.push(CommandStep::Transfer);
        self
    }

    pub fn reconnect(mut self) -> Self {
        self.steps.push(CommandStep::Reconnect);
        self
    }

    /// Append a raw step. A `Transfer` pushed this way uses whatever `TransferSpec`
    /// was set through [`Sequence::transfer`], if any.
    pub fn step(mut self, step: CommandStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[CommandStep] {
        &self.steps
    }
}

impl Installer for Sequence {
    fn package_name(&self) -> &str {
        &self.name
    }

    fn install_sequence(&self) -> Vec<CommandStep> {
        self.steps.clone()
    }

    fn transfer(&self) -> Option<&TransferSpec> {
        self.transfer.as_ref()
    }
}

/// Verifier assembled from check commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    name: String,
    checks: Vec<String>,
}

impl Verification {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn check(mut self, command: impl Into<String>) -> Self {
        self.checks.push(command.into());
        self
    }
}

impl Verifier for Verification {
    fn package_name(&self) -> &str {
        &self.name
    }

    fn commands(&self) -> Vec<String> {
        self.checks.clone()
    }
}
