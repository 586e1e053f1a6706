//! Per-installation client identity
//!
//! The client session id is created once and reused for every event this
//! installation emits. It is read once at startup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};

/// Yields the installation's client session id, creating it on first use
pub trait IdentityStore: Send + Sync {
    fn get_or_create(&self) -> Result<String>;
}

/// Stores the id as a single line in a file
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$XDG_DATA_HOME/watchtrail/client_session_id`
    pub fn default_location() -> Self {
        Self::new(Config::identity_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn get_or_create(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let id = content.trim();
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
                tracing::warn!(path = %self.path.display(), "Identity file is empty, regenerating");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Identity(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let id = uuid::Uuid::new_v4().to_string();
        fs::write(&self.path, format!("{}\n", id)).map_err(|e| {
            Error::Identity(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        tracing::info!(path = %self.path.display(), "Created client session id");
        Ok(id)
    }
}
