//! Transport seam between the sequencer and the network.
//!
//! A [`Connector`] opens direct sessions and the optional gateway; a
//! [`Tunnel`] opens sessions routed through that gateway. The production
//! implementations drive the OpenSSH client binaries (see [`client`] and
//! [`gateway`]).

mod client;
mod gateway;

pub use client::{OpenSshConnector, OpenSshSession, SshSettings};
pub use gateway::OpenSshGateway;

use std::io::Read;

use crate::error::Result;
use crate::options::{ConnectionOptions, SessionKey};

/// What a running command reports back over its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Both output streams are drained.
    Eof,
    ExitStatus(i32),
    ExitSignal(String),
}

/// Events of one dispatched command, ending when the channel closes.
pub type Channel<'a> = Box<dyn Iterator<Item = ChannelEvent> + 'a>;

/// How one file is written on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Upper bound on bytes per write.
    pub chunk_size: usize,
    /// Permission bits applied before the file is moved into place.
    pub mode: Option<u32>,
    /// Name used when the remote path turns out to be an existing directory.
    pub file_name: Option<String>,
}

impl UploadOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            mode: None,
            file_name: None,
        }
    }
}

/// An open secure-shell session to one host.
pub trait Session {
    fn host(&self) -> &str;

    /// Dispatch `command`. An `Err` means the command never started.
    fn exec(&mut self, command: &str) -> Result<Channel<'_>>;

    /// Copy everything from `source` into `remote_path`. Returns the number
    /// of bytes sent.
    fn upload(
        &mut self,
        remote_path: &str,
        source: &mut dyn Read,
        options: &UploadOptions,
    ) -> Result<u64>;

    fn close(&mut self) -> Result<()>;
}

/// Opens sessions and gateways.
pub trait Connector {
    fn connect(&self, key: &SessionKey) -> Result<Box<dyn Session>>;

    fn open_gateway(&self, address: &str, options: &ConnectionOptions) -> Result<Box<dyn Tunnel>>;
}

/// A shared tunnel that forwards new sessions to hosts behind it.
pub trait Tunnel {
    fn address(&self) -> &str;

    fn connect(&mut self, key: &SessionKey) -> Result<Box<dyn Session>>;

    fn shutdown(&mut self) -> Result<()>;
}
