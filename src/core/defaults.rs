use serde::{Deserialize, Serialize};
use std::fs;

use crate::paths;

/// Root configuration structure for rolecall.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolecallConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via rolecall.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_ssh")]
    pub ssh: SshDefaults,

    #[serde(default = "default_transfer")]
    pub transfer: TransferDefaults,

    #[serde(default = "default_sudo_command")]
    pub sudo_command: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            ssh: default_ssh(),
            transfer: default_transfer(),
            sudo_command: default_sudo_command(),
        }
    }
}

/// Configuration for the OpenSSH client invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshDefaults {
    #[serde(default = "default_ssh_program")]
    pub program: String,

    /// Helper used to feed a configured password to `ssh`.
    #[serde(default = "default_password_program")]
    pub password_program: String,

    #[serde(default = "default_ssh_flags")]
    pub flags: Vec<String>,

    /// `ControlPersist` of each master. `yes` keeps it up until the session
    /// closes it; a timeout lets idle cached sessions expire.
    #[serde(default = "default_control_persist")]
    pub control_persist: String,
}

/// Configuration for artifact transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDefaults {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_ssh() -> SshDefaults {
    SshDefaults {
        program: default_ssh_program(),
        password_program: default_password_program(),
        flags: default_ssh_flags(),
        control_persist: default_control_persist(),
    }
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_password_program() -> String {
    "sshpass".to_string()
}

fn default_ssh_flags() -> Vec<String> {
    [
        "ConnectTimeout=10",
        "ServerAliveInterval=15",
        "ServerAliveCountMax=3",
        "StrictHostKeyChecking=accept-new",
    ]
    .iter()
    .flat_map(|opt| ["-o".to_string(), opt.to_string()])
    .collect()
}

fn default_control_persist() -> String {
    "yes".to_string()
}

fn default_transfer() -> TransferDefaults {
    TransferDefaults {
        chunk_size: default_chunk_size(),
        temp_prefix: default_temp_prefix(),
    }
}

fn default_chunk_size() -> usize {
    32 * 1024
}

fn default_temp_prefix() -> String {
    ".rolecall-upload-".to_string()
}

fn default_sudo_command() -> String {
    "sudo".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// If rolecall.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full rolecall.json config, falling back to defaults on any error.
pub fn load_config() -> RolecallConfig {
    load_config_from_file().unwrap_or_default()
}

fn load_config_from_file() -> crate::Result<RolecallConfig> {
    let path = paths::rolecall_json()?;

    if !path.exists() {
        return Err(crate::Error::other("rolecall.json not found"));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_config(&content, &path.display().to_string())
}

fn parse_config(content: &str, origin: &str) -> crate::Result<RolecallConfig> {
    serde_json::from_str(content).map_err(|e| crate::Error::config_invalid_json(origin, e))
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}
