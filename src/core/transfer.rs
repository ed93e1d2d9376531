use std::fs::{File, Metadata};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, ErrorCode, Result};
use crate::executor::{self, CommandOutcome};
use crate::recorder::ExecutionRecorder;
use crate::ssh::{Session, UploadOptions};
use crate::step::TransferSpec;
use crate::utils::shell;

/// What a transfer copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Copies local files and directory trees over an open session.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    chunk_size: usize,
}

impl TransferEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Upload `spec.source` to `spec.destination` on the session's host.
    ///
    /// A destination ending in `/` names a directory: single files keep
    /// their file name inside it.
    pub fn upload(
        &self,
        session: &mut dyn Session,
        spec: &TransferSpec,
    ) -> Result<TransferReport> {
        let host = session.host().to_string();
        let source = spec.source.display().to_string();

        let metadata = std::fs::metadata(&spec.source).map_err(|e| {
            Error::transfer_failed(&host, &source, &spec.destination, e.to_string())
        })?;

        let result = if metadata.is_dir() {
            if !spec.recursive {
                return Err(Error::transfer_failed(
                    &host,
                    &source,
                    &spec.destination,
                    "source is a directory and recursive transfer was not requested",
                ));
            }
            self.upload_tree(session, spec)
        } else {
            let remote = file_destination(&spec.source, &spec.destination);
            self.upload_file(session, &spec.source, &remote)
                .map(|bytes| TransferReport {
                    files: 1,
                    directories: 0,
                    bytes,
                })
        };
        let report = result.map_err(|e| classify(e, &host, &source, &spec.destination))?;

        log_debug!(
            "transfer",
            "{} -> {}:{} ({} files, {} directories, {} bytes)",
            source,
            host,
            spec.destination,
            report.files,
            report.directories,
            report.bytes
        );

        Ok(report)
    }

    /// Upload one local file. The remote copy gets the local permission bits,
    /// and lands inside `remote` under the local name if `remote` is an
    /// existing directory.
    fn upload_file(&self, session: &mut dyn Session, local: &Path, remote: &str) -> Result<u64> {
        let open_error = |e: std::io::Error| {
            Error::internal_io(e.to_string(), Some(format!("open {}", local.display())))
        };
        let mut file = File::open(local).map_err(open_error)?;
        let metadata = file.metadata().map_err(open_error)?;

        let options = UploadOptions {
            mode: permission_bits(&metadata),
            file_name: local
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            ..UploadOptions::new(self.chunk_size)
        };
        session.upload(remote, &mut file, &options)
    }

    fn upload_tree(
        &self,
        session: &mut dyn Session,
        spec: &TransferSpec,
    ) -> Result<TransferReport> {
        let root = spec.destination.trim_end_matches('/');
        let root = if root.is_empty() { "/" } else { root };

        let mut directories = Vec::new();
        let mut files = Vec::new();
        collect_tree(&spec.source, Path::new(""), &mut directories, &mut files)?;

        let mut remote_dirs = vec![root.to_string()];
        remote_dirs.extend(directories.iter().map(|rel| remote_join(root, rel)));

        if let Some(command) = shell::mkdir_all(&remote_dirs) {
            make_directories(session, &command)?;
        }

        let mut report = TransferReport {
            files: 0,
            directories: remote_dirs.len(),
            bytes: 0,
        };

        for rel in &files {
            let local = spec.source.join(rel);
            report.bytes += self.upload_file(session, &local, &remote_join(root, rel))?;
            report.files += 1;
        }

        Ok(report)
    }
}

fn make_directories(session: &mut dyn Session, command: &str) -> Result<()> {
    let mut recorder = ExecutionRecorder::new(session.host());
    match executor::run(session, command, &mut recorder) {
        CommandOutcome::Completed(0) => Ok(()),
        CommandOutcome::DispatchFailed(cause) => {
            Err(Error::ssh_transport(session.host(), "mkdir", cause))
        }
        outcome => {
            let stderr = recorder.record().stderr_lossy();
            let reason = if stderr.trim().is_empty() {
                outcome.to_string()
            } else {
                stderr
            };
            Err(Error::ssh_transport(session.host(), "mkdir", reason))
        }
    }
}

/// Sub-directories and files under `dir`, relative to the walk root, in
/// lexical order with parents before children.
fn collect_tree(
    dir: &Path,
    rel: &Path,
    directories: &mut Vec<PathBuf>,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    let read = std::fs::read_dir(dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
    })?;

    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
        })?;
        entries.push(entry.path());
    }
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let child = rel.join(name);
        if path.is_dir() {
            directories.push(child.clone());
            collect_tree(&path, &child, directories, files)?;
        } else {
            files.push(child);
        }
    }

    Ok(())
}

fn remote_join(root: &str, rel: &Path) -> String {
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if root.ends_with('/') {
        format!("{}{}", root, rel)
    } else {
        format!("{}/{}", root, rel)
    }
}

fn file_destination(source: &Path, destination: &str) -> String {
    match source.file_name() {
        Some(name) if destination.ends_with('/') => {
            format!("{}{}", destination, name.to_string_lossy())
        }
        _ => destination.to_string(),
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &Metadata) -> Option<u32> {
    None
}

static PERMISSION_DENIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)permission denied|operation not permitted|read-only file system").unwrap()
});

// Remote permission problems become TransferNoPermission and local read
// problems become TransferFailed. Everything else passes through untouched.
fn classify(error: Error, host: &str, source: &str, destination: &str) -> Error {
    if error.code == ErrorCode::TransferNoPermission || error.code == ErrorCode::TransferFailed {
        return error;
    }

    let cause = error
        .details
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or(&error.message)
        .to_string();

    if error.code == ErrorCode::SshTransportFailed && PERMISSION_DENIED.is_match(&cause) {
        return Error::transfer_no_permission(host, source, destination, cause.trim());
    }

    if error.code == ErrorCode::InternalIoError {
        let cause = match error.details.get("context").and_then(|v| v.as_str()) {
            Some(context) => format!("{}: {}", context, cause),
            None => cause,
        };
        return Error::transfer_failed(host, source, destination, cause);
    }

    error
}
