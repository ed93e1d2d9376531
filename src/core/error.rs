use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    RoleNotFound,
    RoleEmpty,

    SshConnectFailed,
    SshIdentityFileNotFound,
    SshTransportFailed,
    GatewayFailed,

    RemoteCommandFailed,

    TransferFailed,
    TransferNoPermission,

    InternalIoError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::RoleNotFound => "role.not_found",
            ErrorCode::RoleEmpty => "role.empty",

            ErrorCode::SshConnectFailed => "ssh.connect_failed",
            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshTransportFailed => "ssh.transport_failed",
            ErrorCode::GatewayFailed => "ssh.gateway_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::TransferFailed => "transfer.failed",
            ErrorCode::TransferNoPermission => "transfer.no_permission",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleNotFoundDetails {
    pub role: String,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConnectFailedDetails {
    pub host: String,
    pub user: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshIdentityFileNotFoundDetails {
    pub host: String,
    pub identity_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshTransportFailedDetails {
    pub host: String,
    pub operation: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayFailedDetails {
    pub gateway: String,
    pub error: String,
}

/// Everything captured about the command that broke an install run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub package: String,
    pub host: String,
    pub command: String,
    pub exit_code: i32,
    pub outcome: String,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailedDetails {
    pub host: String,
    pub source: String,
    pub destination: String,
    pub cause: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        let details = to_details(MissingArgumentDetails { args });
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            details,
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn role_not_found(role: impl Into<String>, available: Vec<String>) -> Self {
        let role = role.into();
        let details = to_details(RoleNotFoundDetails {
            role: role.clone(),
            available,
        });

        Self::new(
            ErrorCode::RoleNotFound,
            format!("Role '{}' has no registered hosts", role),
            details,
        )
    }

    pub fn role_empty() -> Self {
        Self::new(
            ErrorCode::RoleEmpty,
            "You must define at least a single role",
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Register a host with Delivery::role(\"app\", \"app.example.com\")")
    }

    pub fn ssh_connect_failed(
        host: impl Into<String>,
        user: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let details = to_details(SshConnectFailedDetails {
            host: host.clone(),
            user: user.into(),
            error: error.into(),
        });

        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Could not open SSH session to {}", host),
            details,
        )
    }

    pub fn ssh_identity_file_not_found(
        host: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        let details = to_details(SshIdentityFileNotFoundDetails {
            host: host.into(),
            identity_file: identity_file.into(),
        });

        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            details,
        )
    }

    /// A session-level operation failed after the session was open.
    pub fn ssh_transport(
        host: impl Into<String>,
        operation: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let operation = operation.into();
        let error = error.into();
        let details = to_details(SshTransportFailedDetails {
            host: host.clone(),
            operation: operation.clone(),
            error: error.clone(),
        });

        Self::new(
            ErrorCode::SshTransportFailed,
            format!("{} on {} failed: {}", operation, host, error.trim()),
            details,
        )
    }

    pub fn gateway_failed(gateway: impl Into<String>, error: impl Into<String>) -> Self {
        let gateway = gateway.into();
        let details = to_details(GatewayFailedDetails {
            gateway: gateway.clone(),
            error: error.into(),
        });

        Self::new(
            ErrorCode::GatewayFailed,
            format!("SSH gateway {} failed", gateway),
            details,
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = format!(
            "Remote command failed for package '{}' on {}",
            details.package, details.host
        );
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn transfer_failed(
        host: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let details = to_details(TransferFailedDetails {
            host: host.clone(),
            source: source.into(),
            destination: destination.into(),
            cause: cause.into(),
        });

        Self::new(
            ErrorCode::TransferFailed,
            format!("Transfer to {} failed", host),
            details,
        )
    }

    pub fn transfer_no_permission(
        host: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let details = to_details(TransferFailedDetails {
            host: host.clone(),
            source: source.into(),
            destination: destination.into(),
            cause: cause.into(),
        });

        Self::new(
            ErrorCode::TransferNoPermission,
            format!("No permission to write transfer destination on {}", host),
            details,
        )
        .with_hint("Enable use_sudo or upload to a directory the SSH user owns")
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Host the failure is attributed to, when the details carry one.
    pub fn host(&self) -> Option<&str> {
        self.details.get("host").and_then(Value::as_str)
    }
}
