//! Workspace-rooted file operations.
//!
//! Every path is resolved against the workspace root; escapes via `..`
//! or absolute paths outside the root are rejected before any I/O.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::fs;

/// Max bytes returned by a single read.
const MAX_READ_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Resolve `requested` inside `root`, rejecting escapes.
///
/// Lexical normalization (no filesystem access) so the check also works
/// for paths that do not exist yet.
pub fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested = Path::new(requested);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(format!("path escapes the workspace: {}", requested.display()));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    if !normalized.starts_with(root) {
        return Err(format!("path is outside the workspace: {}", requested.display()));
    }
    Ok(normalized)
}

/// Read a file (UTF-8 lossy), optionally a line window.
pub async fn read_file(
    root: &Path,
    path: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<String, String> {
    let resolved = resolve_in_root(root, path)?;
    let meta = fs::metadata(&resolved)
        .await
        .map_err(|e| format!("cannot read {path}: {e}"))?;
    if meta.is_dir() {
        return Err(format!("{path} is a directory"));
    }
    if meta.len() > MAX_READ_BYTES && offset.is_none() && limit.is_none() {
        return Err(format!(
            "{path} is {} bytes; read it with offset/limit",
            meta.len()
        ));
    }

    let bytes = fs::read(&resolved)
        .await
        .map_err(|e| format!("cannot read {path}: {e}"))?;
    let text = String::from_utf8_lossy(&bytes);

    match (offset, limit) {
        (None, None) => Ok(text.into_owned()),
        (offset, limit) => {
            let start = offset.unwrap_or(0);
            let lines: Vec<&str> = text.lines().collect();
            let end = limit.map(|l| (start + l).min(lines.len())).unwrap_or(lines.len());
            if start >= lines.len() {
                return Ok(String::new());
            }
            Ok(lines[start..end].join("\n"))
        }
    }
}

/// Write a file, creating parent directories.
pub async fn write_file(root: &Path, path: &str, content: &str) -> Result<(), String> {
    let resolved = resolve_in_root(root, path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create parent of {path}: {e}"))?;
    }
    fs::write(&resolved, content)
        .await
        .map_err(|e| format!("cannot write {path}: {e}"))
}

/// List a directory, sorted directories-first then by name.
pub async fn list_dir(root: &Path, path: &str) -> Result<Vec<DirEntry>, String> {
    let resolved = resolve_in_root(root, path)?;
    let mut reader = fs::read_dir(&resolved)
        .await
        .map_err(|e| format!("cannot list {path}: {e}"))?;

    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| format!("cannot list {path}: {e}"))?
    {
        let meta = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            is_dir: meta.is_dir(),
        });
    }
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
    Ok(entries)
}
