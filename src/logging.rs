//! Tracing subscriber setup for the service

use crate::config::{LogRotation, LoggingOptions};
use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::OnceLock;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

// Dropping the guard stops the background log writer.
static LOG_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type FilteredRegistry = Layered<EnvFilter, Registry>;
type DynLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Install the global subscriber: console output plus, when `options.file`
/// is set, a plain-text copy written off-thread.
///
/// Does nothing if a subscriber is already installed.
pub fn install(options: &LoggingOptions) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&options.level)
        .map_err(|e| Error::Config(format!("log level `{}` rejected: {e}", options.level)))?;

    let file = match &options.file {
        Some(path) => {
            let (writer, guard) = log_file_writer(path, options.rotation)?;
            let _ = LOG_WRITER_GUARD.set(guard);
            Some(file_sink::<FilteredRegistry>(writer))
        }
        None => None,
    };

    Registry::default()
        .with(filter)
        .with(file)
        .with(console_sink(options.color))
        .try_init()
        .map_err(|e| Error::Config(format!("cannot install tracing subscriber: {e}")))
}

fn log_file_writer(
    path: &Path,
    rotation: Option<LogRotation>,
) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("cannot create {}: {e}", dir.display())))?;

    let builder = NonBlockingBuilder::default().lossy(false);

    let Some(rotation) = rotation else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
        return Ok(builder.finish(file));
    };

    let prefix = path.file_name().ok_or_else(|| {
        Error::Config(format!(
            "rotated log path {} has no file name",
            path.display()
        ))
    })?;
    let appender = match rotation {
        LogRotation::Hourly => rolling::hourly(dir, prefix),
        LogRotation::Daily => rolling::daily(dir, prefix),
    };
    Ok(builder.finish(appender))
}

fn file_sink<S>(writer: NonBlocking) -> DynLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync + 'static,
{
    fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
        .boxed()
}

fn console_sink<S>(color: bool) -> DynLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync + 'static,
{
    fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(io::stdout)
        .with_ansi(color)
        .boxed()
}
