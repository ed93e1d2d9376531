//! Role-wide install and verify runs.
//!
//! Hosts are visited in registration order and steps run in order on each
//! host. The first failing command stops the whole run: later steps on that
//! host and every later host are skipped. Hosts already done stay as they are.

use crate::connection::{Connection, ConnectionManager};
use crate::defaults::Defaults;
use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::executor;
use crate::installer::{Installer, Verifier};
use crate::options::ConnectionOptions;
use crate::recorder::{ExecutionRecord, ExecutionRecorder};
use crate::role::RoleRegistry;
use crate::ssh::Connector;
use crate::step::{self, CommandStep, TransferSpec};
use crate::transfer::TransferEngine;
use crate::utils::color;

/// A command that ran (or failed to start) with a non-zero outcome.
#[derive(Debug, Clone)]
struct CommandFailure {
    record: ExecutionRecord,
}

impl CommandFailure {
    fn into_details(self, package: &str) -> RemoteCommandFailedDetails {
        let stdout = self.record.stdout_lossy();
        let stderr = self.record.stderr_lossy();
        let exit_code = self.record.exit_code();
        let outcome = self
            .record
            .outcome
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        RemoteCommandFailedDetails {
            package: package.to_string(),
            host: self.record.host,
            command: self.record.command,
            exit_code,
            outcome,
            stdout,
            stderr,
        }
    }
}

#[derive(Debug)]
enum RoleOutcome {
    Completed,
    Failed(CommandFailure),
}

/// Runs installers and verifiers against the hosts of a role.
///
/// One sequencer owns one connection cache and at most one gateway. It is
/// `!Send`: calls are strictly sequential.
pub struct CommandSequencer {
    registry: RoleRegistry,
    options: ConnectionOptions,
    connections: ConnectionManager,
    transfer: TransferEngine,
    sudo_command: String,
}

impl CommandSequencer {
    pub fn new(
        registry: RoleRegistry,
        options: ConnectionOptions,
        connector: Box<dyn Connector>,
        defaults: &Defaults,
    ) -> Result<Self> {
        if registry.is_empty() {
            return Err(Error::role_empty());
        }

        Ok(Self {
            registry,
            options,
            connections: ConnectionManager::new(connector),
            transfer: TransferEngine::new(defaults.transfer.chunk_size),
            sudo_command: defaults.sudo_command.clone(),
        })
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Run the installer's steps on every host of `role`.
    ///
    /// A failing command becomes a `remote.command_failed` error naming the
    /// package, host, command, output and exit code.
    pub fn install(&mut self, installer: &dyn Installer, role: &str) -> Result<()> {
        let package = installer.package_name();
        let steps = installer.install_sequence();

        log_status!("install", "Installing {} on role {}", package, role);

        match self.process(role, &steps, installer.transfer())? {
            RoleOutcome::Completed => {
                log_status!("install", "{} {}", package, color::green("installed"));
                Ok(())
            }
            RoleOutcome::Failed(failure) => {
                log_status!(
                    "install",
                    "{} {} on {}",
                    package,
                    color::red("failed"),
                    failure.record.host
                );
                Err(Error::remote_command_failed(failure.into_details(package)))
            }
        }
    }

    /// Check the verifier on every host of `role`.
    ///
    /// The checks run as one `&&`-joined command per host. A failing check
    /// yields `Ok(false)`; connection, transfer and config problems are
    /// still errors.
    pub fn verify(&mut self, verifier: &dyn Verifier, role: &str) -> Result<bool> {
        let package = verifier.package_name();
        let commands = verifier.commands();
        let steps = if commands.is_empty() {
            Vec::new()
        } else {
            vec![CommandStep::Shell(step::composite_command(&commands))]
        };

        log_status!("verify", "Verifying {} on role {}", package, role);

        match self.process(role, &steps, None)? {
            RoleOutcome::Completed => Ok(true),
            RoleOutcome::Failed(failure) => {
                log_status!(
                    "verify",
                    "{} not satisfied on {} ({})",
                    package,
                    failure.record.host,
                    failure
                        .record
                        .outcome
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                );
                Ok(false)
            }
        }
    }

    /// Shut the gateway down. Safe to call more than once.
    pub fn teardown(&mut self) -> Result<()> {
        self.connections.teardown()
    }

    fn process(
        &mut self,
        role: &str,
        steps: &[CommandStep],
        transfer: Option<&TransferSpec>,
    ) -> Result<RoleOutcome> {
        let hosts = self
            .registry
            .hosts(role)
            .filter(|hosts| !hosts.is_empty())
            .ok_or_else(|| Error::role_not_found(role, self.registry.roles()))?
            .to_vec();

        if let Some(gateway) = self.options.normalized().gateway {
            self.connections.setup_gateway(&gateway, &self.options)?;
        }

        let steps = if self.options.use_sudo {
            step::wrap_sudo(steps, &self.sudo_command)
        } else {
            steps.to_vec()
        };

        for host in &hosts {
            log_debug!("sequence", "{}: {} steps", host, steps.len());

            let mut connection = self.connections.acquire(host, &self.options)?;
            let result = self.run_steps(&mut connection, &steps, transfer);
            self.connections.release(connection);

            if let Some(failure) = result? {
                return Ok(RoleOutcome::Failed(failure));
            }
        }

        Ok(RoleOutcome::Completed)
    }

    fn run_steps(
        &mut self,
        connection: &mut Connection,
        steps: &[CommandStep],
        transfer: Option<&TransferSpec>,
    ) -> Result<Option<CommandFailure>> {
        let mut recorder = ExecutionRecorder::new(connection.host());

        for step in steps {
            match step {
                CommandStep::Shell(command) => {
                    let outcome = connection
                        .with_session(|session| executor::run(session, command, &mut recorder));
                    if !outcome.is_success() {
                        return Ok(Some(CommandFailure {
                            record: recorder.into_record(),
                        }));
                    }
                }
                CommandStep::Transfer => {
                    let spec = transfer.ok_or_else(|| {
                        Error::validation_missing_argument(vec!["transfer".to_string()])
                    })?;
                    let engine = &self.transfer;
                    connection.with_session(|session| engine.upload(session, spec))?;
                }
                CommandStep::Reconnect => {
                    log_debug!("sequence", "{}: reconnecting", connection.host());
                    *connection = self.connections.reconnect(connection, &self.options)?;
                }
            }
        }

        Ok(None)
    }
}
