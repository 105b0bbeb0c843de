use super::Directory;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Load a hosts file; a missing file is an empty directory
pub async fn load(path: &Path) -> io::Result<Directory> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let directory = Directory::parse_bytes(&bytes);
            debug!("Loaded {} records from {:?}", directory.len(), path);
            Ok(directory)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No hosts file at {:?}, starting empty", path);
            Ok(Directory::new())
        }
        Err(e) => Err(e),
    }
}

/// Write the directory's serialization to `path` atomically
pub async fn persist(directory: &Directory, path: &Path) -> io::Result<()> {
    write_atomic(path, &directory.serialize()).await
}

/// Write to a sibling temporary file, then rename it over `path`
///
/// Callers must not write the same path concurrently; the temporary name is
/// derived from the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = sibling(path, ".tmp");
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }

    Ok(())
}

/// Keep a pristine `<path>.orig` copy of an existing hosts file
///
/// Returns whether a backup was written.
pub async fn backup_original(path: &Path) -> io::Result<bool> {
    let orig = sibling(path, ".orig");
    if !tokio::fs::try_exists(path).await? || tokio::fs::try_exists(&orig).await? {
        return Ok(false);
    }

    tokio::fs::copy(path, &orig).await?;
    info!("Saved original hosts file to {:?}", orig);
    Ok(true)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
