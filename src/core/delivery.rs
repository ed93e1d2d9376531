//! Building a [`CommandSequencer`] from code or from a JSON delivery file.
//!
//! ```json
//! {
//!   "user": "deploy",
//!   "keys": "~/.ssh/id_ed25519",
//!   "gateway": "bastion.example.com",
//!   "useSudo": true,
//!   "roles": { "app": ["a.example.com", "b.example.com"] }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::defaults::{self, Defaults};
use crate::error::{Error, Result};
use crate::options::ConnectionOptions;
use crate::role::RoleRegistry;
use crate::sequencer::CommandSequencer;
use crate::ssh::{Connector, OpenSshConnector};

/// On-disk shape of a delivery file: connection options plus roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(flatten)]
    pub options: ConnectionOptions,

    #[serde(default)]
    pub roles: RoleRegistry,
}

/// Builder for a [`CommandSequencer`].
///
/// Options are fixed once [`Delivery::build`] returns.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    config: DeliveryConfig,
}

impl Delivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: DeliveryConfig) -> Self {
        Self { config }
    }

    /// Read a delivery file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
        })?;
        parse(&content, &path.display().to_string())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        parse(json, "<inline>")
    }

    pub fn role(mut self, role: impl Into<String>, host: impl Into<String>) -> Self {
        self.config.roles.register(role, host);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.options.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.options.password = Some(password.into());
        self
    }

    pub fn key(mut self, path: impl Into<String>) -> Self {
        self.config.options.keys.push(path.into());
        self
    }

    pub fn keys<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.options.keys = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.options.port = port;
        self
    }

    pub fn gateway(mut self, address: impl Into<String>) -> Self {
        self.config.options.gateway = Some(address.into());
        self
    }

    pub fn use_sudo(mut self, use_sudo: bool) -> Self {
        self.config.options.use_sudo = use_sudo;
        self
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Build a sequencer that talks to hosts through the OpenSSH client,
    /// using defaults from `rolecall.json`.
    pub fn build(self) -> Result<CommandSequencer> {
        let defaults = defaults::load_defaults();
        let connector = OpenSshConnector::new(&defaults)?;
        self.build_with(Box::new(connector), &defaults)
    }

    /// Build a sequencer over a custom transport.
    pub fn build_with(
        self,
        connector: Box<dyn Connector>,
        defaults: &Defaults,
    ) -> Result<CommandSequencer> {
        validate(&self.config.options)?;
        CommandSequencer::new(self.config.roles, self.config.options, connector, defaults)
    }
}

fn parse(content: &str, origin: &str) -> Result<Delivery> {
    let config: DeliveryConfig =
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))?;
    Ok(Delivery::from_config(config))
}

fn validate(options: &ConnectionOptions) -> Result<()> {
    if options.user.trim().is_empty() {
        return Err(Error::validation_invalid_argument(
            "user",
            "SSH user must not be empty",
            None,
        ));
    }

    if options.port == 0 {
        return Err(Error::validation_invalid_argument(
            "port",
            "SSH port must be between 1 and 65535",
            Some(options.port.to_string()),
        ));
    }

    Ok(())
}
