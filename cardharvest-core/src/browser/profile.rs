use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};

const LOCK_FILE: &str = ".cardharvest.lock";

/// The single persistent user-data directory Chromium runs against.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    path: PathBuf,
    stale_after: Duration,
}

impl BrowserProfile {
    pub fn new<P: AsRef<Path>>(path: P, stale_after: Duration) -> BrowserResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(Self { path, stale_after })
    }

    pub fn from_config(config: &ChromiumSection, path: &Path) -> BrowserResult<Self> {
        Self::new(path, Duration::from_secs(config.stale_lock_minutes * 60))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.join(LOCK_FILE)
    }

    /// Takes exclusive ownership of the profile for this process.
    pub fn lock(&self) -> BrowserResult<ProfileLock> {
        let lock_path = self.lock_path();
        self.reclaim_stale(&lock_path);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    BrowserError::ProfileLocked(self.path.display().to_string())
                }
                _ => BrowserError::Profile(format!("failed to create profile lock: {err}")),
            })?;
        writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())
            .map_err(|err| BrowserError::Profile(format!("failed to write profile lock: {err}")))?;
        Ok(ProfileLock { path: lock_path })
    }

    fn reclaim_stale(&self, lock_path: &Path) {
        let Ok(metadata) = std::fs::metadata(lock_path) else {
            return;
        };
        let Ok(modified) = metadata.modified() else {
            return;
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.stale_after {
            tracing::warn!(path = %lock_path.display(), age_secs = age.as_secs(), "removing stale profile lock");
            if let Err(err) = std::fs::remove_file(lock_path) {
                tracing::warn!(path = %lock_path.display(), error = %err, "failed to remove stale profile lock");
            }
        }
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %err, "profile lock already gone");
        }
    }
}
