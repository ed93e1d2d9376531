use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tempfile::TempDir;
use uuid::Uuid;

use super::gateway::OpenSshGateway;
use super::{Channel, ChannelEvent, Connector, Session, Tunnel, UploadOptions};
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::options::{ConnectionOptions, SessionKey};
use crate::utils::shell;

/// How the OpenSSH client is invoked, resolved once per connector.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub program: String,
    pub password_program: String,
    pub flags: Vec<String>,
    pub control_persist: String,
    pub temp_prefix: String,
    pub read_chunk_size: usize,
    pub socket_dir: PathBuf,
}

impl SshSettings {
    pub fn from_defaults(defaults: &Defaults, socket_dir: &Path) -> Self {
        Self {
            program: defaults.ssh.program.clone(),
            password_program: defaults.ssh.password_program.clone(),
            flags: defaults.ssh.flags.clone(),
            control_persist: defaults.ssh.control_persist.clone(),
            temp_prefix: defaults.transfer.temp_prefix.clone(),
            read_chunk_size: defaults.transfer.chunk_size,
            socket_dir: socket_dir.to_path_buf(),
        }
    }

    fn new_control_path(&self) -> PathBuf {
        self.socket_dir
            .join(format!("{}.sock", Uuid::new_v4().simple()))
    }
}

/// Opens multiplexed OpenSSH master connections, one per session.
///
/// Control sockets live in a private temporary directory removed when the
/// connector is dropped.
pub struct OpenSshConnector {
    settings: SshSettings,
    _socket_dir: TempDir,
}

impl OpenSshConnector {
    pub fn new(defaults: &Defaults) -> Result<Self> {
        let socket_dir = tempfile::Builder::new()
            .prefix("rolecall-")
            .tempdir()
            .map_err(|e| {
                Error::internal_io(
                    e.to_string(),
                    Some("create ssh control socket directory".to_string()),
                )
            })?;
        let settings = SshSettings::from_defaults(defaults, socket_dir.path());

        Ok(Self {
            settings,
            _socket_dir: socket_dir,
        })
    }
}

impl Connector for OpenSshConnector {
    fn connect(&self, key: &SessionKey) -> Result<Box<dyn Session>> {
        Ok(Box::new(OpenSshSession::open(&self.settings, key, None)?))
    }

    fn open_gateway(&self, address: &str, options: &ConnectionOptions) -> Result<Box<dyn Tunnel>> {
        Ok(Box::new(OpenSshGateway::open(&self.settings, address, options)?))
    }
}

/// A session backed by an OpenSSH control master.
///
/// Commands and uploads are separate `ssh` client processes multiplexed over
/// the master's control socket, so authentication happens once per session.
pub struct OpenSshSession {
    key: SessionKey,
    settings: SshSettings,
    control_path: PathBuf,
    open: bool,
}

impl OpenSshSession {
    /// Start a master connection for `key`, optionally through `proxy_command`.
    pub fn open(
        settings: &SshSettings,
        key: &SessionKey,
        proxy_command: Option<String>,
    ) -> Result<Self> {
        let identity_files = resolve_identity_files(key)?;
        let control_path = settings.new_control_path();
        let log_path = control_path.with_extension("log");
        let log = File::create(&log_path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", log_path.display())))
        })?;

        let mut cmd = match &key.options.password {
            Some(password) => {
                let mut cmd = Command::new(&settings.password_program);
                cmd.arg("-e").arg(&settings.program).env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new(&settings.program);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };

        cmd.args(&settings.flags);

        for identity_file in &identity_files {
            cmd.arg("-i").arg(identity_file);
        }

        if key.options.port != 22 {
            cmd.arg("-p").arg(key.options.port.to_string());
        }

        if let Some(proxy) = &proxy_command {
            cmd.arg("-o").arg(format!("ProxyCommand={}", proxy));
        }

        cmd.args(["-o", "ControlMaster=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-o")
            .arg(format!("ControlPersist={}", settings.control_persist))
            .args(["-f", "-N"])
            .arg(key.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        log_debug!("ssh", "Opening session to {}", key.destination());

        let program = cmd.get_program().to_string_lossy().to_string();
        let status = cmd.status().map_err(|e| {
            Error::ssh_connect_failed(
                &key.host,
                key.user(),
                format!("Failed to run {}: {}", program, e),
            )
        });
        let diagnostics = std::fs::read_to_string(&log_path).unwrap_or_default();
        let _ = std::fs::remove_file(&log_path);
        let status = status?;

        if !status.success() {
            let error = if diagnostics.trim().is_empty() {
                format!("ssh exited with code {}", status.code().unwrap_or(-1))
            } else {
                diagnostics.trim().to_string()
            };
            return Err(Error::ssh_connect_failed(&key.host, key.user(), error));
        }

        Ok(Self {
            key: key.clone(),
            settings: settings.clone(),
            control_path,
            open: true,
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// `ssh` invocation that rides on this session's master. The caller
    /// appends the destination-relative arguments.
    fn client_command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.program);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"]);

        if self.key.options.port != 22 {
            cmd.arg("-p").arg(self.key.options.port.to_string());
        }

        cmd
    }

    /// Fails when the session was closed or its master went away. Clients
    /// never fall back to a direct connection of their own.
    fn ensure_open(&mut self, operation: &str) -> Result<()> {
        if !self.open {
            return Err(Error::ssh_transport(&self.key.host, operation, "session is closed"));
        }

        let alive = self
            .client_command()
            .args(["-O", "check"])
            .arg(self.key.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if !alive {
            self.open = false;
            log_debug!("ssh", "Master for {} is gone", self.key.destination());
            return Err(Error::ssh_transport(
                &self.key.host,
                operation,
                "master connection is gone",
            ));
        }

        Ok(())
    }
}

impl Session for OpenSshSession {
    fn host(&self) -> &str {
        &self.key.host
    }

    fn exec(&mut self, command: &str) -> Result<Channel<'_>> {
        self.ensure_open("exec")?;

        let child = self
            .client_command()
            .arg(self.key.destination())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ssh_transport(
                    &self.key.host,
                    "exec",
                    format!("Failed to run {}: {}", self.settings.program, e),
                )
            })?;

        Ok(Box::new(ProcessChannel::start(
            child,
            self.settings.read_chunk_size,
        )))
    }

    fn upload(
        &mut self,
        remote_path: &str,
        source: &mut dyn Read,
        options: &UploadOptions,
    ) -> Result<u64> {
        let operation = format!("upload {}", remote_path);
        self.ensure_open(&operation)?;

        // Write to a temp file in the same directory and move it into place,
        // so a busy destination (running binary) is replaced atomically.
        let temp_path = temp_path_for(remote_path, &self.settings.temp_prefix);
        let script = upload_script(&temp_path, remote_path, options);

        let mut child = self
            .client_command()
            .arg(self.key.destination())
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ssh_transport(
                    &self.key.host,
                    &operation,
                    format!("Failed to run {}: {}", self.settings.program, e),
                )
            })?;

        let mut sent = 0u64;
        let mut write_error = None;

        if let Some(mut stdin) = child.stdin.take() {
            let mut frame = vec![0u8; options.chunk_size.max(1)];
            loop {
                let n = match source.read(&mut frame) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::internal_io(
                            e.to_string(),
                            Some(format!("read upload source for {}", remote_path)),
                        ));
                    }
                };

                // The remote side exiting early shows up as a broken pipe;
                // its stderr explains why.
                if let Err(e) = stdin.write_all(&frame[..n]) {
                    write_error = Some(e);
                    break;
                }
                sent += n as u64;
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::ssh_transport(&self.key.host, &operation, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let reason = if !stderr.trim().is_empty() {
                stderr
            } else if let Some(e) = write_error {
                e.to_string()
            } else {
                format!("exit code {}", output.status.code().unwrap_or(-1))
            };
            return Err(Error::ssh_transport(&self.key.host, &operation, reason));
        }

        if let Some(e) = write_error {
            return Err(Error::ssh_transport(&self.key.host, &operation, e.to_string()));
        }

        Ok(sent)
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let output = self
            .client_command()
            .args(["-O", "exit"])
            .arg(self.key.destination())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ssh_transport(&self.key.host, "close", e.to_string()))?;

        if !output.status.success() {
            return Err(Error::ssh_transport(
                &self.key.host,
                "close",
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        log_debug!("ssh", "Closed session to {}", self.key.destination());
        Ok(())
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close();
        }
    }
}

fn resolve_identity_files(key: &SessionKey) -> Result<Vec<String>> {
    key.options
        .keys
        .iter()
        .map(|path| {
            if Path::new(path).exists() {
                Ok(path.clone())
            } else {
                Err(Error::ssh_identity_file_not_found(&key.host, path))
            }
        })
        .collect()
}

fn temp_path_for(remote_path: &str, prefix: &str) -> String {
    let remote = Path::new(remote_path);
    let dir = remote
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty())
        .unwrap_or(".");
    let name = remote
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");

    format!("{}/{}{}.{}", dir, prefix, name, Uuid::new_v4().simple())
}

/// Remote shell that stores stdin at `remote_path` by way of `temp_path`.
/// The temp file is removed if any step fails.
fn upload_script(temp_path: &str, remote_path: &str, options: &UploadOptions) -> String {
    let mut steps = vec![r#"cat > "$tmp""#.to_string()];

    if let Some(mode) = options.mode {
        steps.push(format!(r#"chmod {:o} "$tmp""#, mode));
    }

    if let Some(name) = &options.file_name {
        steps.push(format!(
            r#"{{ [ ! -d "$dest" ] || dest="$dest"/{}; }}"#,
            shell::quote_path(name)
        ));
    }

    steps.push(r#"mv -f "$tmp" "$dest""#.to_string());

    format!(
        r#"tmp={}; dest={}; {} || {{ rc=$?; rm -f "$tmp"; exit $rc; }}"#,
        shell::quote_path(temp_path),
        shell::quote_path(remote_path),
        steps.join(" && ")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Exited,
    Done,
}

/// Channel over a spawned `ssh` client process.
///
/// stdout and stderr are read on helper threads feeding one queue, so a
/// chatty stream can never fill its pipe while the other is being waited on.
struct ProcessChannel {
    child: Child,
    events: Receiver<ChannelEvent>,
    readers: Vec<JoinHandle<()>>,
    phase: Phase,
}

impl ProcessChannel {
    fn start(mut child: Child, chunk_size: usize) -> Self {
        let (tx, events) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            readers.push(pump(stdout, tx.clone(), ChannelEvent::Stdout, chunk_size));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump(stderr, tx, ChannelEvent::Stderr, chunk_size));
        }

        Self {
            child,
            events,
            readers,
            phase: Phase::Streaming,
        }
    }
}

impl Iterator for ProcessChannel {
    type Item = ChannelEvent;

    fn next(&mut self) -> Option<ChannelEvent> {
        match self.phase {
            Phase::Streaming => match self.events.recv() {
                Ok(event) => Some(event),
                Err(_) => {
                    for reader in self.readers.drain(..) {
                        let _ = reader.join();
                    }
                    self.phase = Phase::Exited;
                    Some(ChannelEvent::Eof)
                }
            },
            Phase::Exited => {
                self.phase = Phase::Done;
                self.child.wait().ok().map(exit_event)
            }
            Phase::Done => None,
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if self.phase != Phase::Done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn pump<R>(
    mut reader: R,
    events: Sender<ChannelEvent>,
    wrap: fn(Vec<u8>) -> ChannelEvent,
    chunk_size: usize,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if events.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

fn exit_event(status: ExitStatus) -> ChannelEvent {
    if let Some(code) = status.code() {
        return ChannelEvent::ExitStatus(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ChannelEvent::ExitSignal(format!("signal {}", signal));
        }
    }

    ChannelEvent::ExitSignal("unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_channel(script: &str) -> ProcessChannel {
        let child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn sh");
        ProcessChannel::start(child, 4)
    }

    fn collect(channel: ProcessChannel) -> (Vec<u8>, Vec<u8>, Vec<ChannelEvent>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut tail = Vec::new();
        for event in channel {
            match event {
                ChannelEvent::Stdout(bytes) => stdout.extend(bytes),
                ChannelEvent::Stderr(bytes) => stderr.extend(bytes),
                other => tail.push(other),
            }
        }
        (stdout, stderr, tail)
    }

    #[cfg(unix)]
    #[test]
    fn process_channel_separates_streams_and_reports_status() {
        let (stdout, stderr, tail) = collect(local_channel("echo out; echo err >&2; exit 3"));

        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
        assert_eq!(tail, vec![ChannelEvent::Eof, ChannelEvent::ExitStatus(3)]);
    }

    #[cfg(unix)]
    #[test]
    fn process_channel_chunks_large_output() {
        let channel = local_channel("printf 'abcdefghij'");
        let chunks: Vec<_> = channel
            .filter_map(|e| match e {
                ChannelEvent::Stdout(bytes) => Some(bytes),
                _ => None,
            })
            .collect();

        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.concat(), b"abcdefghij");
    }

    #[cfg(unix)]
    #[test]
    fn process_channel_reports_signal() {
        let (_, _, tail) = collect(local_channel("kill -9 $$"));
        assert_eq!(tail, vec![ChannelEvent::Eof, ChannelEvent::ExitSignal("signal 9".to_string())]);
    }

    /// Settings whose `ssh` is a local shell script with the given body.
    #[cfg(unix)]
    fn scripted_ssh(dir: &Path, body: &str) -> SshSettings {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("ssh");
        std::fs::write(&program, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        SshSettings {
            program: program.display().to_string(),
            password_program: "sshpass".to_string(),
            flags: Vec::new(),
            control_persist: "yes".to_string(),
            temp_prefix: ".rolecall-upload-".to_string(),
            read_chunk_size: 4,
            socket_dir: dir.to_path_buf(),
        }
    }

    /// A session that believes its master is up.
    #[cfg(unix)]
    fn attached(settings: SshSettings) -> OpenSshSession {
        OpenSshSession {
            key: SessionKey::new("app.example.com", &ConnectionOptions::default()),
            control_path: settings.socket_dir.join("master.sock"),
            settings,
            open: true,
        }
    }

    // Control commands succeed; anything else runs the remote command locally.
    #[cfg(unix)]
    const LOCAL_SSH: &str = r#"for arg; do last="$arg"; done
case " $* " in *" -O "*) exit 0;; esac
exec sh -c "$last"
"#;

    #[cfg(unix)]
    #[test]
    fn exec_on_an_expired_master_is_a_dispatch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls");
        let body = format!("echo \"$*\" >> '{}'\nexit 255\n", calls.display());
        let mut session = attached(scripted_ssh(dir.path(), &body));

        let err = session.exec("uptime").err().unwrap();
        assert_eq!(err.code, crate::ErrorCode::SshTransportFailed);
        assert_eq!(err.host(), Some("app.example.com"));
        assert!(!session.is_open());

        let mut recorder = crate::recorder::ExecutionRecorder::new("app.example.com");
        let outcome = crate::executor::run(&mut session, "uptime", &mut recorder);
        assert!(matches!(outcome, crate::executor::CommandOutcome::DispatchFailed(_)));

        // Only the liveness check ever ran; nothing dialed the host directly.
        let log = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("-O check"));
    }

    #[cfg(unix)]
    #[test]
    fn upload_applies_the_source_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut session = attached(scripted_ssh(dir.path(), LOCAL_SSH));
        let remote = dir.path().join("deploy.sh");
        let options = UploadOptions {
            mode: Some(0o755),
            ..UploadOptions::new(4)
        };

        let sent = session
            .upload(&remote.display().to_string(), &mut &b"#!/bin/sh\n"[..], &options)
            .unwrap();

        assert_eq!(sent, 10);
        assert_eq!(std::fs::read(&remote).unwrap(), b"#!/bin/sh\n");
        let mode = std::fs::metadata(&remote).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn upload_into_an_existing_directory_keeps_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let sites = dir.path().join("sites");
        std::fs::create_dir(&sites).unwrap();
        let mut session = attached(scripted_ssh(dir.path(), LOCAL_SSH));
        let options = UploadOptions {
            file_name: Some("site.conf".to_string()),
            ..UploadOptions::new(32768)
        };

        session
            .upload(&sites.display().to_string(), &mut &b"server {}"[..], &options)
            .unwrap();

        assert!(sites.is_dir());
        assert_eq!(std::fs::read(sites.join("site.conf")).unwrap(), b"server {}");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".rolecall-upload-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn upload_to_a_plain_path_ignores_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = attached(scripted_ssh(dir.path(), LOCAL_SSH));
        let remote = dir.path().join("app.conf");
        let options = UploadOptions {
            file_name: Some("site.conf".to_string()),
            ..UploadOptions::new(32768)
        };

        session
            .upload(&remote.display().to_string(), &mut &b"x"[..], &options)
            .unwrap();

        assert_eq!(std::fs::read(&remote).unwrap(), b"x");
        assert!(!dir.path().join("site.conf").exists());
    }

    #[test]
    fn upload_script_only_adds_requested_steps() {
        let plain = upload_script("/opt/.t", "/opt/app", &UploadOptions::new(1));
        assert_eq!(
            plain,
            concat!(
                r#"tmp='/opt/.t'; dest='/opt/app'; cat > "$tmp" && mv -f "$tmp" "$dest""#,
                r#" || { rc=$?; rm -f "$tmp"; exit $rc; }"#
            )
        );

        let options = UploadOptions {
            chunk_size: 1,
            mode: Some(0o4755),
            file_name: Some("it's".to_string()),
        };
        let full = upload_script("/opt/.t", "/opt/app", &options);
        assert!(full.contains(r#"chmod 4755 "$tmp""#));
        assert!(full.contains(r#"dest="$dest"/'it'\''s'"#));
    }

    #[test]
    fn temp_path_stays_in_destination_directory() {
        let temp = temp_path_for("/srv/app/bin/server", ".rolecall-upload-");
        assert!(temp.starts_with("/srv/app/bin/.rolecall-upload-server."));
    }

    #[test]
    fn temp_path_for_bare_file_name_uses_working_directory() {
        let temp = temp_path_for("server", ".up-");
        assert!(temp.starts_with("./.up-server."));
    }

    #[test]
    fn missing_identity_file_is_reported() {
        let options = ConnectionOptions {
            keys: vec!["/nonexistent/rolecall/id_ed25519".to_string()],
            ..ConnectionOptions::default()
        };
        let key = SessionKey::new("app.example.com", &options);

        let err = resolve_identity_files(&key).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::SshIdentityFileNotFound);
        assert_eq!(err.host(), Some("app.example.com"));
    }
}
