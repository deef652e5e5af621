//! Durable verification state.
//!
//! Stored as a small JSON file so that a completed first-boot verification,
//! or a recent failure, survives process restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{StateError, VerificationState};

/// Persistent disk mount used by the hosting platform.
const PERSISTENT_DIR: &str = "/data";

/// File name of the state record inside the state directory.
pub const STATE_FILE_NAME: &str = "verification.json";

/// Mutex-guarded verification state backed by a JSON file.
#[derive(Debug)]
pub struct VerificationStore {
    path: PathBuf,
    state: Mutex<VerificationState>,
}

impl VerificationStore {
    /// Load state from `path`.
    ///
    /// A missing file yields the default (never verified) state. A file that
    /// cannot be parsed is logged and treated as missing so boot can proceed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();

        let state = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt verification state, starting fresh");
                    VerificationState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no verification state yet");
                VerificationState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Directory for persisted state: the platform's persistent disk if mounted,
    /// else the working directory.
    pub fn default_dir() -> PathBuf {
        let persistent = Path::new(PERSISTENT_DIR);
        if persistent.is_dir() {
            persistent.to_path_buf()
        } else {
            PathBuf::from(".")
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state.
    pub async fn snapshot(&self) -> VerificationState {
        self.state.lock().await.clone()
    }

    /// Mark verification completed at `at`.
    pub async fn record_success(&self, at: DateTime<Utc>) -> Result<VerificationState, StateError> {
        self.update(|state| {
            state.completed = true;
            state.completed_at = Some(at);
        })
        .await
    }

    /// Record a failed verification at `at`, starting the cooldown window.
    ///
    /// `completed` is left untouched.
    pub async fn record_failure(&self, at: DateTime<Utc>) -> Result<VerificationState, StateError> {
        self.update(|state| {
            state.last_failure_at = Some(at);
        })
        .await
    }

    /// Apply `f` and persist while holding the lock, so concurrent updates
    /// cannot interleave between memory and disk.
    async fn update<F>(&self, f: F) -> Result<VerificationState, StateError>
    where
        F: FnOnce(&mut VerificationState),
    {
        let mut state = self.state.lock().await;
        f(&mut state);
        let updated = state.clone();
        self.save(&updated).await?;
        info!(
            path = %self.path.display(),
            completed = updated.completed,
            last_failure_at = ?updated.last_failure_at,
            "saved verification state"
        );
        Ok(updated)
    }

    async fn save(&self, state: &VerificationState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(state)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
