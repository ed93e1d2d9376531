use super::client::{OpenSshSession, SshSettings};
use super::{Session, Tunnel};
use crate::error::{Error, Result};
use crate::options::{ConnectionOptions, SessionKey};
use crate::utils::shell;

/// Jump host that every outbound session is forwarded through.
///
/// Holds one master connection to the gateway; target sessions reach their
/// host with `ssh -W` over that master instead of connecting directly.
pub struct OpenSshGateway {
    address: String,
    settings: SshSettings,
    master: OpenSshSession,
}

impl OpenSshGateway {
    /// Connect to the gateway at `address` (`host` or `host:port`, port 22
    /// when omitted) with the user and credentials of `options`.
    pub fn open(
        settings: &SshSettings,
        address: &str,
        options: &ConnectionOptions,
    ) -> Result<Self> {
        let key = gateway_key(address, options);

        log_status!("gateway", "Opening tunnel via {}", key.destination());
        let master = OpenSshSession::open(settings, &key, None)
            .map_err(|e| Error::gateway_failed(address, e.to_string()))?;

        Ok(Self {
            address: address.to_string(),
            settings: settings.clone(),
            master,
        })
    }

    /// Command OpenSSH runs to reach `%h:%p` through the gateway master.
    pub fn proxy_command(&self) -> String {
        let key = self.master.key();
        let port = if key.options.port == 22 {
            String::new()
        } else {
            format!(" -p {}", key.options.port)
        };

        format!(
            "{} -o ControlPath={} -o ControlMaster=no -o BatchMode=yes{} -W %h:%p {}",
            shell::quote_arg(&self.settings.program),
            shell::quote_path(&self.master.control_path().to_string_lossy()),
            port,
            shell::quote_arg(&key.destination()),
        )
    }
}

impl Tunnel for OpenSshGateway {
    fn address(&self) -> &str {
        &self.address
    }

    fn connect(&mut self, key: &SessionKey) -> Result<Box<dyn Session>> {
        if !self.master.is_open() {
            return Err(Error::gateway_failed(&self.address, "tunnel is shut down"));
        }

        log_debug!("gateway", "Forwarding {} via {}", key.destination(), self.address);
        let session = OpenSshSession::open(&self.settings, key, Some(self.proxy_command()))?;
        Ok(Box::new(session))
    }

    fn shutdown(&mut self) -> Result<()> {
        self.master
            .close()
            .map_err(|e| Error::gateway_failed(&self.address, e.to_string()))?;
        log_status!("gateway", "Tunnel via {} closed", self.address);
        Ok(())
    }
}

/// Session key for the gateway itself. The target's port never applies to
/// the gateway; sudo and nested gateways are dropped.
fn gateway_key(address: &str, options: &ConnectionOptions) -> SessionKey {
    let (host, port) = split_address(address);
    let gateway_options = ConnectionOptions {
        port,
        gateway: None,
        use_sudo: false,
        ..options.clone()
    };
    SessionKey::new(host, &gateway_options)
}

/// Host and port of `host`, `host:port` or `[v6]:port`. An absent or
/// unparsable port means 22.
fn split_address(address: &str) -> (&str, u16) {
    let address = address.trim();

    if let Some((host, tail)) = address
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
    {
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(22);
        return (host, port);
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (address, 22),
        },
        _ => (address, 22),
    }
}
