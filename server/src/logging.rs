//! Structured logging initialization.
//!
//! Configures the tracing subscriber. The RUST_LOG environment variable
//! takes precedence over the configuration file level. When a log file is
//! configured, the destination can be reopened in place (SIGTTIN rotation)
//! without touching the subscriber.

use crate::config::LogConfig;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Handle to the active log destination.
#[derive(Clone)]
pub struct LogHandle {
    inner: Arc<LogDestination>,
}

struct LogDestination {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl LogHandle {
    /// Reopen the log file at its configured path. No-op for stderr logging.
    pub fn reopen(&self) {
        let Some(ref path) = self.inner.path else {
            return;
        };
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                *self.inner.file.lock().unwrap() = Some(file);
                tracing::info!("log reopened at {}", path.display());
            }
            Err(e) => {
                eprintln!("failed to reopen log {}: {}", path.display(), e);
            }
        }
    }
}

struct LogWriter {
    inner: Arc<LogDestination>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.inner.file.lock().unwrap();
        match guard.as_mut() {
            Some(file) => file.write(buf),
            None => std::io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut guard = self.inner.file.lock().unwrap();
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => std::io::stderr().flush(),
        }
    }
}

/// Initialize the logging subsystem and return the reopen handle.
///
/// Safe to call more than once (later calls keep the first subscriber);
/// this keeps tests that each build a server from panicking.
pub fn init(config: &LogConfig) -> LogHandle {
    let file = config.name.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("cannot open log {}: {}", path.display(), e);
                None
            }
        }
    });

    let handle = LogHandle {
        inner: Arc::new(LogDestination {
            path: config.name.clone(),
            file: Mutex::new(file),
        }),
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    };

    let writer_handle = handle.clone();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || LogWriter {
                    inner: writer_handle.inner.clone(),
                })
                .with_thread_names(true),
        )
        .try_init();

    handle
}
