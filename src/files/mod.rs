//! File operations (§4.4): binary-safe read/write/stream plus directory
//! manipulation, all gated by an allow-list of path prefixes.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::config::FileOpsConfig;
use crate::error::{AppError, AppResult};

/// Bytes sniffed from the head of a file to decide binary vs. text.
const SNIFF_LEN: usize = 8192;
/// Chunk size for `read_file_stream`'s SSE `chunk` events.
const STREAM_CHUNK_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct Permissions {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub relative_path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub mode: u32,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub size: u64,
    pub mime_type: String,
    pub is_binary: bool,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileStreamEvent {
    Metadata {
        mime_type: String,
        size: u64,
        is_binary: bool,
        encoding: &'static str,
    },
    Chunk {
        data: String,
    },
    Complete {
        bytes_read: u64,
    },
    Error {
        message: String,
    },
}

/// Validate a requested path against the allow-list: reject NUL bytes,
/// overlong paths, and anything that escapes the configured roots once
/// `..` components are resolved.
pub fn validate_path(requested: &Path, config: &FileOpsConfig) -> AppResult<PathBuf> {
    let raw = requested.to_string_lossy();
    if raw.len() > config.max_path_len {
        return Err(AppError::InvalidPath(format!(
            "path exceeds max length of {} bytes",
            config.max_path_len
        )));
    }
    if raw.as_bytes().contains(&0) {
        return Err(AppError::InvalidPath("path contains a NUL byte".to_string()));
    }
    if !requested.is_absolute() {
        return Err(AppError::InvalidPath("path must be absolute".to_string()));
    }

    let normalized = normalize(requested);
    let within_allowed = config
        .allowed_roots
        .iter()
        .any(|root| normalized.starts_with(root));
    if !within_allowed {
        return Err(AppError::PathSecurityViolation(format!(
            "{} is outside the allowed roots",
            normalized.display()
        )));
    }
    Ok(normalized)
}

/// Reject references to an already-executable file under `/tmp` — enough to
/// stop a drop-and-run (write a binary, then read/move/delete it as cover)
/// without blocking ordinary scratch-file use of `/tmp`.
async fn reject_tmp_executable(path: &Path) -> AppResult<()> {
    if !path.starts_with("/tmp") {
        return Ok(());
    }
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
            return Err(AppError::DangerousCommand(format!(
                "{} is an executable file under /tmp",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Lexically resolve `.` and `..` without touching the filesystem, so this
/// also works for paths that don't exist yet (e.g. a file about to be created).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn sniff_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(SNIFF_LEN).any(|&b| b == 0)
}

pub async fn read_file(path: &Path, config: &FileOpsConfig) -> AppResult<FileContent> {
    let path = validate_path(path, config)?;
    reject_tmp_executable(&path).await?;
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| AppError::FileNotFound(path.display().to_string()))?;
    if metadata.is_dir() {
        return Err(AppError::IsDirectory(path.display().to_string()));
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::IoError(format!("reading {}: {e}", path.display())))?;
    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(FileContent {
        path: path.display().to_string(),
        size: bytes.len() as u64,
        mime_type,
        is_binary: sniff_binary(&bytes),
        bytes,
    })
}

/// Stream a file as an SSE event sequence: exactly one `metadata`, zero or
/// more `chunk`s, then a single terminal `complete` or `error`.
pub async fn read_file_stream(
    path: &Path,
    config: &FileOpsConfig,
) -> AppResult<mpsc::Receiver<FileStreamEvent>> {
    let path = validate_path(path, config)?;
    reject_tmp_executable(&path).await?;
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| AppError::FileNotFound(path.display().to_string()))?;
    if metadata.is_dir() {
        return Err(AppError::IsDirectory(path.display().to_string()));
    }

    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let size = metadata.len();
    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::IoError(format!("opening {}: {e}", path.display())))?;

    let mut head = vec![0u8; SNIFF_LEN.min(size as usize)];
    let head_read = file
        .read(&mut head)
        .await
        .map_err(|e| AppError::IoError(format!("reading {}: {e}", path.display())))?;
    head.truncate(head_read);
    let is_binary = sniff_binary(&head);

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        if tx
            .send(FileStreamEvent::Metadata {
                mime_type,
                size,
                is_binary,
                encoding: "base64",
            })
            .await
            .is_err()
        {
            return;
        }

        let mut bytes_read = head_read as u64;
        if !head.is_empty() {
            // Only ever short for files smaller than STREAM_CHUNK_LEN.
            let first = head.chunks(STREAM_CHUNK_LEN).next().unwrap_or(&head);
            if tx
                .send(FileStreamEvent::Chunk {
                    data: BASE64.encode(first),
                })
                .await
                .is_err()
            {
                return;
            }
            if head.len() > STREAM_CHUNK_LEN {
                for rest in head[STREAM_CHUNK_LEN..].chunks(STREAM_CHUNK_LEN) {
                    if tx
                        .send(FileStreamEvent::Chunk {
                            data: BASE64.encode(rest),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }

        let mut buf = vec![0u8; STREAM_CHUNK_LEN];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    bytes_read += n as u64;
                    if tx
                        .send(FileStreamEvent::Chunk {
                            data: BASE64.encode(&buf[..n]),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(FileStreamEvent::Error { message: e.to_string() }).await;
                    return;
                }
            }
        }
        let _ = tx.send(FileStreamEvent::Complete { bytes_read }).await;
    });

    Ok(rx)
}

pub async fn write_file(path: &Path, bytes: &[u8], config: &FileOpsConfig) -> AppResult<()> {
    let path = validate_path(path, config)?;
    reject_tmp_executable(&path).await?;
    tokio::fs::write(&path, bytes).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            AppError::FileNotFound(format!("parent directory for {} does not exist", path.display()))
        }
        _ => AppError::IoError(format!("writing {}: {e}", path.display())),
    })
}

pub async fn mkdir(path: &Path, recursive: bool, config: &FileOpsConfig) -> AppResult<()> {
    let path = validate_path(path, config)?;
    let result = if recursive {
        tokio::fs::create_dir_all(&path).await
    } else {
        tokio::fs::create_dir(&path).await
    };
    result.map_err(|e| match e.kind() {
        std::io::ErrorKind::AlreadyExists => AppError::FileExists(path.display().to_string()),
        _ => AppError::IoError(format!("creating {}: {e}", path.display())),
    })
}

/// Files only — directory removal is a deliberate policy gap, pushed onto
/// the caller via `exec("rm -rf …")` so a single SDK call can't wipe a tree.
/// A symlink is removed as a link; its target is left untouched.
pub async fn delete_file(path: &Path, config: &FileOpsConfig) -> AppResult<()> {
    let path = validate_path(path, config)?;
    reject_tmp_executable(&path).await?;
    let metadata = tokio::fs::symlink_metadata(&path)
        .await
        .map_err(|_| AppError::FileNotFound(path.display().to_string()))?;
    if metadata.is_dir() {
        return Err(AppError::IsDirectory(path.display().to_string()));
    }
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| AppError::IoError(format!("deleting {}: {e}", path.display())))
}

/// Shared by both `renameFile` (same directory) and `moveFile` (different
/// directory) — the distinction is purely in the request DTO.
pub async fn move_file(from: &Path, to: &Path, config: &FileOpsConfig) -> AppResult<()> {
    let from = validate_path(from, config)?;
    let to = validate_path(to, config)?;
    reject_tmp_executable(&from).await?;
    if tokio::fs::metadata(&to).await.is_ok() {
        return Err(AppError::FileExists(to.display().to_string()));
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::IoError(format!("creating parent dirs for {}: {e}", to.display())))?;
    }
    match tokio::fs::rename(&from, &to).await {
        Ok(()) => Ok(()),
        // EXDEV: source and destination are on different filesystems.
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| AppError::IoError(format!("copying {}: {e}", from.display())))?;
            tokio::fs::remove_file(&from)
                .await
                .map_err(|e| AppError::IoError(format!("removing {} after copy: {e}", from.display())))
        }
        Err(e) => Err(AppError::IoError(format!(
            "renaming {} to {}: {e}",
            from.display(),
            to.display()
        ))),
    }
}

fn classify(metadata: &std::fs::Metadata) -> FileKind {
    if metadata.is_symlink() {
        FileKind::Symlink
    } else if metadata.is_dir() {
        FileKind::Directory
    } else if metadata.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    }
}

fn sort_dirs_first(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        let a_dir = a.kind == FileKind::Directory;
        let b_dir = b.kind == FileKind::Directory;
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });
}

fn walk_dir(dir: PathBuf, root: PathBuf, recursive: bool, include_hidden: bool) -> BoxFuture<'static, AppResult<Vec<FileEntry>>> {
    async move {
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| AppError::FileNotFound(dir.display().to_string()))?;

        let mut level = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| AppError::IoError(format!("reading dir {}: {e}", dir.display())))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let entry_path = entry.path();
            let metadata = match tokio::fs::symlink_metadata(&entry_path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let kind = classify(&metadata);
            let mode = metadata.permissions().mode();
            let relative_path = entry_path
                .strip_prefix(&root)
                .unwrap_or(&entry_path)
                .display()
                .to_string();
            let mime_type = (kind != FileKind::Directory).then(|| {
                mime_guess::from_path(&entry_path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
            level.push(FileEntry {
                name,
                path: entry_path.display().to_string(),
                relative_path,
                kind,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                mime_type,
                mode,
                permissions: Permissions {
                    readable: mode & 0o400 != 0,
                    writable: mode & 0o200 != 0,
                    executable: mode & 0o100 != 0,
                },
            });
        }
        sort_dirs_first(&mut level);

        let mut out = Vec::new();
        for entry in level {
            let is_dir = entry.kind == FileKind::Directory;
            let child_path = PathBuf::from(&entry.path);
            out.push(entry);
            if recursive && is_dir {
                out.extend(walk_dir(child_path, root.clone(), recursive, include_hidden).await?);
            }
        }
        Ok(out)
    }
    .boxed()
}

pub async fn list_files(
    path: &Path,
    recursive: bool,
    include_hidden: bool,
    config: &FileOpsConfig,
) -> AppResult<Vec<FileEntry>> {
    let root = validate_path(path, config)?;
    walk_dir(root.clone(), root, recursive, include_hidden).await
}
