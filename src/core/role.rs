use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named, ordered groups of host addresses.
///
/// Hosts keep their registration order; the same host may be registered
/// more than once and is then visited more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleRegistry {
    roles: BTreeMap<String, Vec<String>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a host to a role, creating the role on first use.
    pub fn register(&mut self, role: impl Into<String>, host: impl Into<String>) {
        self.roles.entry(role.into()).or_default().push(host.into());
    }

    /// Replace every role at once.
    #[deprecated(note = "register hosts one at a time with `register`")]
    pub fn replace_all(&mut self, roles: BTreeMap<String, Vec<String>>) {
        self.roles = roles;
    }

    /// True if any of the given names is a registered role.
    pub fn has_any<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|name| self.roles.contains_key(name.as_ref()))
    }

    pub fn hosts(&self, role: &str) -> Option<&[String]> {
        self.roles.get(role).map(Vec::as_slice)
    }

    pub fn roles(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
