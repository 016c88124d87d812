use std::io;
use std::path::Path;

use tracing::info;

use crate::browser::{SitePage, StorageState};

use super::AuthResult;

/// File persistence for session state. Contents are never inspected here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStore;

impl SessionStore {
    /// Captures the context's state and writes it to `path`, replacing any previous file.
    pub async fn save<P>(page: &P, path: &Path) -> AuthResult<()>
    where
        P: SitePage + ?Sized,
    {
        let state = page.export_state().await?;
        Self::write(&state, path)?;
        info!(path = %path.display(), cookies = state.cookies.len(), "session saved");
        Ok(())
    }

    /// Seeds `page` with the state stored at `path`. `Ok(None)` when there is no file.
    pub async fn restore<P>(page: &P, path: &Path) -> AuthResult<Option<StorageState>>
    where
        P: SitePage + ?Sized,
    {
        let Some(state) = Self::load(path)? else {
            return Ok(None);
        };
        page.import_state(&state).await?;
        info!(path = %path.display(), cookies = state.cookies.len(), "session restored");
        Ok(Some(state))
    }

    pub fn write(state: &StorageState, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(state)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, json)
    }

    /// `Ok(None)` when no file exists at `path`.
    pub fn load(path: &Path) -> io::Result<Option<StorageState>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// Returns whether a file was removed.
    pub fn delete(path: &Path) -> io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "session deleted");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
