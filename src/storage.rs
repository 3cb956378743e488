//! Storage for saved QR images
//!
//! The save directory is the only persisted state of the service. It is
//! reached through [`QrStore`] so handlers can run against a real directory or
//! an in-memory map.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

/// Directory name used next to the executable when no save dir is configured
pub const DEFAULT_DIR_NAME: &str = "saved_qrcodes";

/// Blob store addressed by flat file names under a single root directory
#[async_trait]
pub trait QrStore: Send + Sync {
    /// Absolute directory every stored file lives in
    fn root(&self) -> &Path;

    /// Write `bytes` under `name`, replacing any existing file, and return its absolute path
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<PathBuf>;

    /// Read the file stored under `name`
    async fn get(&self, name: &str) -> Result<Vec<u8>>;
}

/// File name for an image saved at `timestamp`, e.g. `qrcode_20240131_235959.png`
pub fn saved_file_name<Tz>(timestamp: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("qrcode_{}.png", timestamp.format("%Y%m%d_%H%M%S"))
}

// Accept only a single plain path component.
fn file_component(name: &str) -> Option<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name && !name.contains('\\') => {
            Some(name)
        }
        _ => None,
    }
}

fn not_found(name: &str) -> Error {
    Error::NotFound(format!("{name} not found"))
}

/// Store backed by a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open `dir` as a store, creating it if absent.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let root = dir.canonicalize()?;
        tracing::debug!(root = %root.display(), "Opened save directory");
        Ok(Self { root })
    }

    /// Default save directory: `saved_qrcodes` next to the running executable
    pub fn default_dir() -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        let base = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(base.join(DEFAULT_DIR_NAME))
    }
}

#[async_trait]
impl QrStore for DirectoryStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = file_component(name)
            .ok_or_else(|| Error::BadRequest(format!("invalid file name '{name}'")))?;
        let path = self.root.join(name);
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Saved QR image");
        Ok(path)
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let file = file_component(name).ok_or_else(|| not_found(name))?;
        match tokio::fs::read(self.root.join(file)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(name)),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Store that keeps files in memory under a virtual root
#[derive(Debug)]
pub struct MemoryStore {
    root: PathBuf,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store reporting paths under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Names currently stored, sorted
    pub fn names(&self) -> Vec<String> {
        let files = self.files.lock().expect("store mutex poisoned");
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.files.lock().expect("store mutex poisoned").len()
    }

    /// Whether nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QrStore for MemoryStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = file_component(name)
            .ok_or_else(|| Error::BadRequest(format!("invalid file name '{name}'")))?;
        self.files
            .lock()
            .expect("store mutex poisoned")
            .insert(name.to_string(), bytes.to_vec());
        Ok(self.root.join(name))
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .expect("store mutex poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }
}
