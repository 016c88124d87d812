mod authenticator;
mod session_store;
mod state;

use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;

pub use authenticator::Authenticator;
pub use session_store::SessionStore;
pub use state::{AuthEvent, AuthState};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no stored session at {path}")]
    SessionNotFound { path: PathBuf },
    #[error("stored session is no longer valid")]
    SessionExpired,
    #[error("authentication failed: {0}")]
    Failed(String),
    #[error("login did not complete within {seconds}s")]
    Timeout { seconds: u64 },
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;
