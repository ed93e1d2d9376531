use serde::{Deserialize, Deserializer, Serialize};

/// Credentials and routing shared by every session an actor opens.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key files, tried in order. A single path is accepted in config.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default)]
    pub use_sudo: bool,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            user: default_user(),
            password: None,
            keys: Vec::new(),
            port: default_port(),
            gateway: None,
            use_sudo: false,
        }
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keys", &self.keys)
            .field("port", &self.port)
            .field("gateway", &self.gateway)
            .field("use_sudo", &self.use_sudo)
            .finish()
    }
}

impl ConnectionOptions {
    /// Canonical form used for cache keys: equal settings written
    /// differently compare equal.
    pub fn normalized(&self) -> Self {
        Self {
            user: self.user.trim().to_string(),
            password: self.password.clone().filter(|p| !p.is_empty()),
            keys: self
                .keys
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(|k| shellexpand::tilde(k).to_string())
                .collect(),
            port: self.port,
            gateway: self
                .gateway
                .as_deref()
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            use_sudo: self.use_sudo,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(key)) => vec![key],
        Some(OneOrMany::Many(keys)) => keys,
        None => Vec::new(),
    })
}

/// Structural identity of a cached session: host plus the full normalized
/// option set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub options: ConnectionOptions,
}

impl SessionKey {
    pub fn new(host: &str, options: &ConnectionOptions) -> Self {
        Self {
            host: host.trim().to_string(),
            options: options.normalized(),
        }
    }

    pub fn user(&self) -> &str {
        &self.options.user
    }

    /// `user@host` as passed to the ssh client.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.options.user, self.host)
    }
}
