use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::options::{ConnectionOptions, SessionKey};
use crate::ssh::{Connector, Session, Tunnel};

/// Handle to a session owned by a [`ConnectionManager`].
///
/// Cloning the handle does not open anything; clones refer to the same
/// session. The handle is deliberately `!Send`: one actor, one caller.
#[derive(Clone)]
pub struct Connection {
    session: Rc<RefCell<Box<dyn Session>>>,
    host: String,
    routed: bool,
}

impl Connection {
    fn new(session: Box<dyn Session>, routed: bool) -> Self {
        let host = session.host().to_string();
        Self {
            session: Rc::new(RefCell::new(session)),
            host,
            routed,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// True for sessions tunneled through the gateway (never cached).
    pub fn is_routed(&self) -> bool {
        self.routed
    }

    /// True if both handles refer to the same underlying session.
    pub fn same_as(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.session, &other.session)
    }

    /// Run `f` with exclusive access to the session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut dyn Session) -> R) -> R {
        let mut session = self.session.borrow_mut();
        f(&mut **session)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("routed", &self.routed)
            .finish()
    }
}

/// Opens, caches and routes sessions for one actor.
///
/// Direct sessions are cached by [`SessionKey`] for the manager's lifetime.
/// When the options name a gateway, sessions are tunneled through the single
/// shared gateway instead and bypass the cache.
pub struct ConnectionManager {
    // Field order matters: cached sessions and the gateway must be dropped
    // before the connector that owns their resources.
    cache: HashMap<SessionKey, Connection>,
    gateway: Option<Box<dyn Tunnel>>,
    connector: Box<dyn Connector>,
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            cache: HashMap::new(),
            gateway: None,
            connector,
        }
    }

    /// Return the session for `(host, options)`, opening it on first use.
    pub fn acquire(&mut self, host: &str, options: &ConnectionOptions) -> Result<Connection> {
        let key = SessionKey::new(host, options);

        if key.options.gateway.is_some() {
            return self.tunnel(&key);
        }

        if let Some(connection) = self.cache.get(&key) {
            return Ok(connection.clone());
        }

        let connection = Connection::new(self.connector.connect(&key)?, false);
        self.cache.insert(key, connection.clone());
        Ok(connection)
    }

    /// Close `connection` and open a fresh session to the same host.
    pub fn reconnect(
        &mut self,
        connection: &Connection,
        options: &ConnectionOptions,
    ) -> Result<Connection> {
        if let Err(e) = connection.with_session(|session| session.close()) {
            log_debug!("ssh", "Ignoring close failure on {}: {}", connection.host(), e);
        }

        let key = SessionKey::new(connection.host(), options);
        if key.options.gateway.is_some() {
            return self.tunnel(&key);
        }

        self.cache.remove(&key);
        self.acquire(connection.host(), options)
    }

    /// Give back a connection after a host's steps are done.
    ///
    /// Cached sessions stay open for reuse; gateway-routed ones are closed.
    pub fn release(&mut self, connection: Connection) {
        if !connection.is_routed() {
            return;
        }

        if let Err(e) = connection.with_session(|session| session.close()) {
            log_debug!("gateway", "Ignoring close failure on {}: {}", connection.host(), e);
        }
    }

    /// Open the gateway unless one is already up.
    pub fn setup_gateway(&mut self, address: &str, options: &ConnectionOptions) -> Result<()> {
        if self.gateway.is_none() {
            self.gateway = Some(self.connector.open_gateway(address, options)?);
        }
        Ok(())
    }

    /// Shut the gateway down. Later calls are no-ops.
    pub fn teardown(&mut self) -> Result<()> {
        match self.gateway.take() {
            Some(mut gateway) => gateway.shutdown(),
            None => Ok(()),
        }
    }

    pub fn has_gateway(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }

    fn tunnel(&mut self, key: &SessionKey) -> Result<Connection> {
        let address = key
            .options
            .gateway
            .clone()
            .ok_or_else(|| Error::internal_unexpected("tunnel requested without a gateway"))?;

        self.setup_gateway(&address, &key.options)?;

        let gateway = self
            .gateway
            .as_mut()
            .ok_or_else(|| Error::gateway_failed(&address, "gateway is not running"))?;

        Ok(Connection::new(gateway.connect(key)?, true))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log_error!("gateway", "Teardown failed: {}", e);
        }
    }
}
