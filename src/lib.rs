//! qrserve - turn text into QR-code PNGs over HTTP
//!
//! A small local web service: post text to `/generate` and get a PNG back, or
//! ask for it to be saved into the save directory and receive a JSON
//! descriptor instead. Saved images are served from `/qrcodes/{filename}` and
//! `/open_folder` reveals their folder in the host's file manager.
//!
//! # Features
//!
//! - **QR Processing**: High error-correction encoding with fixed geometry,
//!   plus a decoder for verifying output
//! - **Pluggable storage**: save directory behind [`QrStore`]
//! - **Pluggable side effects**: file-manager launch behind [`Revealer`]
//! - **Async-first**: Built on Tokio and axum
//!
//! # Example
//!
//! ```no_run
//! use qrserve::{QrserveConfig, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = QrserveConfig::load(None)?;
//!     qrserve::logging::install(&config.logging)?;
//!     server::start(config).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod paths;
pub mod qr;
pub mod reveal;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use error::{Error, Result};

pub use config::{LogRotation, LoggingOptions, QrserveConfig, ServerOptions, StorageOptions};
pub use qr::{QrDecoder, QrEncoder, QrPayload};
pub use reveal::{RecordingRevealer, Revealer, SystemRevealer};
pub use server::{AppState, SavedQr, router};
pub use storage::{DirectoryStore, MemoryStore, QrStore};
