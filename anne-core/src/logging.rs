//! Logging bootstrap and per-loader log files
//!
//! Console output goes through `tracing`. Each entity loader and each phase
//! additionally appends timestamped lines to its own file so a run can be
//! audited after the fact.

use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (`info`, `anne_migrate=debug`)
    pub level: String,
    /// Enable JSON format output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Initialize the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = Registry::default().with(env_filter);

    let result = if config.json_format {
        let json_layer = fmt::layer().json().with_current_span(true).with_target(true);
        subscriber.with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer().with_target(false).compact();
        subscriber.with(fmt_layer).try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    tracing::info!(
        "Logging initialized: level={}, json={}",
        config.level,
        config.json_format
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Append-only log file for one loader or phase, mirrored to `tracing`
#[derive(Clone)]
pub struct MigrationLog {
    name: String,
    path: Option<PathBuf>,
    file: Option<Arc<Mutex<BufWriter<File>>>>,
}

impl MigrationLog {
    /// Open `<dir>/<name>.log` for appending
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            name: name.to_string(),
            path: Some(path),
            file: Some(Arc::new(Mutex::new(BufWriter::new(file)))),
        })
    }

    /// Log that only goes to `tracing`
    pub fn console(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            file: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Error, message.as_ref());
    }

    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(log = %self.name, "{}", message),
            LogLevel::Warn => tracing::warn!(log = %self.name, "{}", message),
            LogLevel::Error => tracing::error!(log = %self.name, "{}", message),
        }

        if let Some(file) = &self.file {
            let line = format!(
                "{} [{}] {}\n",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                level.label(),
                message
            );
            let mut writer = file.lock();
            // A broken log file must not abort the migration
            if let Err(e) = writer.write_all(line.as_bytes()).and_then(|_| writer.flush()) {
                tracing::warn!(log = %self.name, "Failed to write log file: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for MigrationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationLog")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_appends() {
        let temp_dir = TempDir::new().unwrap();

        let log = MigrationLog::open(temp_dir.path(), "customers").unwrap();
        log.info("Starting customers migration");
        log.warn("Customer 7: country 99 not found");

        let reopened = MigrationLog::open(temp_dir.path(), "customers").unwrap();
        reopened.error("Batch 2 failed");

        let content = std::fs::read_to_string(temp_dir.path().join("customers.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("[INFO] Starting customers migration"));
        assert!(lines[1].contains("[WARN]"));
        assert!(lines[2].ends_with("[ERROR] Batch 2 failed"));
    }

    #[test]
    fn test_console_log_has_no_file() {
        let log = MigrationLog::console("zones");
        log.info("no file");
        assert!(log.path().is_none());
        assert_eq!(log.name(), "zones");
    }
}
