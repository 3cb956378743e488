//! Revealing a folder in the host's file manager

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::Command;

/// Opens a folder in whatever file browser the environment provides
#[async_trait]
pub trait Revealer: Send + Sync {
    /// Show `folder` to the local user
    async fn reveal(&self, folder: &Path) -> Result<()>;
}

/// Launches the platform's native file manager
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRevealer;

impl SystemRevealer {
    /// Program used to open folders on this platform
    pub fn program() -> &'static str {
        if cfg!(target_os = "windows") {
            "explorer"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        }
    }
}

#[async_trait]
impl Revealer for SystemRevealer {
    async fn reveal(&self, folder: &Path) -> Result<()> {
        let program = Self::program();
        tracing::info!(program, folder = %folder.display(), "Opening folder");

        let status = Command::new(program)
            .arg(folder)
            .status()
            .await
            .map_err(|e| Error::Reveal(format!("failed to launch {program}: {e}")))?;

        // explorer.exe reports 1 even when the window opened.
        if !status.success() {
            tracing::warn!(program, %status, "File manager exited with non-zero status");
        }

        Ok(())
    }
}

/// Records requested folders instead of opening them
#[derive(Debug, Default)]
pub struct RecordingRevealer {
    opened: Mutex<Vec<PathBuf>>,
    failure: Option<String>,
}

impl RecordingRevealer {
    /// Revealer that succeeds and remembers every folder
    pub fn new() -> Self {
        Self::default()
    }

    /// Revealer that records the folder and then fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    /// Folders passed to `reveal` so far, oldest first
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().expect("revealer mutex poisoned").clone()
    }
}

#[async_trait]
impl Revealer for RecordingRevealer {
    async fn reveal(&self, folder: &Path) -> Result<()> {
        self.opened
            .lock()
            .expect("revealer mutex poisoned")
            .push(folder.to_path_buf());

        match &self.failure {
            Some(message) => Err(Error::Reveal(message.clone())),
            None => Ok(()),
        }
    }
}
