//! Install directory locks
//!
//! A tool dependency's installation directory has exactly one writer per
//! attempt. The lock file sits beside the directory so it survives the
//! directory being cleared before a source build.

use fs2::FileExt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// How old a lock file can be before it's considered stale (2 hours)
const STALE_LOCK_AGE_SECS: u64 = 7200;

fn is_stale_lock(lock_path: &Path) -> bool {
    if let Ok(metadata) = std::fs::metadata(lock_path)
        && let Ok(modified) = metadata.modified()
        && let Ok(age) = std::time::SystemTime::now().duration_since(modified)
    {
        return age.as_secs() > STALE_LOCK_AGE_SECS;
    }
    false
}

/// Path of the lock file guarding `install_dir`.
pub fn lock_path_for(install_dir: &Path) -> PathBuf {
    let name = install_dir
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "install".to_string());
    let parent = install_dir.parent().unwrap_or(install_dir);
    parent.join(format!(".{}.lock", name))
}

/// Take the exclusive lock for an installation directory.
/// Returns a guard that releases the lock when dropped.
pub fn acquire_install_lock(install_dir: &Path) -> io::Result<InstallLock> {
    let lock_path = lock_path_for(install_dir);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if lock_path.exists() && is_stale_lock(&lock_path) {
        let _ = std::fs::remove_file(&lock_path);
    }

    let lock_file = File::create(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!(
                "{} is already being installed by another process. \
                 If this is incorrect, delete '{}'",
                install_dir.display(),
                lock_path.display()
            ),
        ));
    }

    Ok(InstallLock {
        _file: lock_file,
        path: lock_path,
    })
}

/// RAII guard for an install lock - unlocks and removes the lock file on drop
#[derive(Debug)]
pub struct InstallLock {
    _file: File,
    path: PathBuf,
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
