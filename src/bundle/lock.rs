//! Single-writer guard for a bundle directory

use super::BundleError;
use crate::store::StoreError;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const LOCK_FILE: &str = ".ingest.lock";

/// Exclusive lock held for the length of one ingestion run
///
/// The lock file is created atomically, records the holder's run id and
/// process id, and is removed on drop. A lock left behind by a process that
/// no longer exists is replaced.
#[derive(Debug)]
pub struct IngestLock {
    path: PathBuf,
    run_id: Uuid,
}

impl IngestLock {
    pub fn acquire(dir: &Path) -> Result<Self, BundleError> {
        fs::create_dir_all(dir).map_err(StoreError::from)?;
        let path = dir.join(LOCK_FILE);

        for _ in 0..2 {
            if let Some(lock) = Self::try_create(&path)? {
                return Ok(lock);
            }
            match LockHolder::read(&path)? {
                // Released in between
                None => continue,
                Some(holder) if holder.is_stale() => {
                    tracing::warn!(path = ?path, holder = %holder, "Removing stale ingest lock");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(StoreError::from(e).into()),
                    }
                }
                Some(holder) => {
                    return Err(BundleError::StoreLocked {
                        path,
                        holder: holder.to_string(),
                    })
                }
            }
        }

        let holder = LockHolder::read(&path)?
            .map(|holder| holder.to_string())
            .unwrap_or_else(|| "unknown run".to_string());
        Err(BundleError::StoreLocked { path, holder })
    }

    /// Create the lock file, or `None` if it already exists
    fn try_create(path: &Path) -> Result<Option<Self>, StoreError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let run_id = Uuid::new_v4();
        if let Err(e) = writeln!(file, "{} {}", run_id, std::process::id()) {
            let _ = fs::remove_file(path);
            return Err(e.into());
        }

        tracing::debug!(path = ?path, run_id = %run_id, "Acquired ingest lock");
        Ok(Some(Self {
            path: path.to_path_buf(),
            run_id,
        }))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = ?self.path, error = %e, "Failed to release ingest lock");
        } else {
            tracing::debug!(run_id = %self.run_id, "Released ingest lock");
        }
    }
}

/// Contents of an existing lock file
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockHolder {
    run_id: String,
    pid: Option<u32>,
}

impl LockHolder {
    /// `None` if the lock file is gone
    fn read(path: &Path) -> Result<Option<Self>, StoreError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(Self::parse(&contents))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn parse(contents: &str) -> Self {
        let mut fields = contents.split_whitespace();
        let run_id = fields.next().unwrap_or("unknown").to_string();
        let pid = fields.next().and_then(|pid| pid.parse().ok());
        Self { run_id, pid }
    }

    /// Holder's process is known to have exited
    ///
    /// A file still being written by its creator has no pid yet and is
    /// never stale.
    fn is_stale(&self) -> bool {
        self.pid.is_some_and(|pid| !process_alive(pid))
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "run {} (pid {})", self.run_id, pid),
            None => write!(f, "run {}", self.run_id),
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
