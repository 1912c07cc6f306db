//! Filesystem helpers for the gateway's open/save operations.
//!
//! Paths are normalised lexically (`.` and `..` collapsed without touching
//! the filesystem). No sandboxing happens here; callers enforce any access
//! policy.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;

/// Mode for parent directories created on write.
const DIR_MODE: u32 = 0o755;
/// Mode for written files.
const FILE_MODE: u32 = 0o644;

/// Collapses `.` and `..` components without resolving symlinks.
pub fn normalize(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_with_normal =
                    matches!(out.components().next_back(), Some(Component::Normal(_)));
                if ends_with_normal {
                    out.pop();
                } else if !matches!(out.components().next_back(), Some(Component::RootDir)) {
                    // Leading `..` in a relative path is preserved;
                    // `/..` stays at the root.
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Reads the whole file as a string.
pub async fn read_to_string(path: &str) -> Result<String> {
    let path = normalize(path);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("file does not exist: {}", path.display())
        }
        Err(e) => {
            Err(e).with_context(|| format!("failed to read file {}", path.display()))
        }
    }
}

/// Overwrites the file with mode 0644, creating missing parent directories
/// with mode 0755 first. Modes are set explicitly so the outcome does not
/// depend on the process umask.
pub async fn write_string(path: &str, content: &str) -> Result<()> {
    let path = normalize(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all_mode(parent).await?;
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(&path)
        .await
        .with_context(|| format!("failed to write file {}", path.display()))?;
    file.write_all(content.as_bytes())
        .await
        .with_context(|| format!("failed to write file {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("failed to write file {}", path.display()))?;
    // The open mode only applies to newly created files and is subject to
    // the umask; chmod makes the bits unconditional.
    tokio::fs::set_permissions(&path, Permissions::from_mode(FILE_MODE))
        .await
        .with_context(|| format!("failed to chmod file {}", path.display()))?;
    Ok(())
}

/// Creates the missing ancestors of `dir` with [`DIR_MODE`]. Directories
/// that already exist keep their permissions.
async fn create_dir_all_mode(dir: &Path) -> Result<()> {
    // Collect the missing ancestors, deepest first.
    let mut missing: Vec<&Path> = Vec::new();
    let mut current = dir;
    loop {
        if current.as_os_str().is_empty()
            || tokio::fs::try_exists(current).await.unwrap_or(false)
        {
            break;
        }
        missing.push(current);
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    for d in missing.into_iter().rev() {
        match tokio::fs::create_dir(d).await {
            Ok(()) => {
                tokio::fs::set_permissions(d, Permissions::from_mode(DIR_MODE))
                    .await
                    .with_context(|| format!("failed to chmod directory {}", d.display()))?;
            }
            // Lost a race with a concurrent creator; the directory is there.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to create directory {}", d.display()))
            }
        }
    }
    Ok(())
}
