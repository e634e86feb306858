//! Logger initialization from the `log:` config section.
//!
//! Level selection honors `RUST_LOG` when set, otherwise the configured
//! level. Sinks (stdout, stderr, file) can be combined. Rotation of the log
//! file is left to external tooling.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::errors::{DaemonError, Result};

pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(build_writer(config)?)
        .try_init()
        .map_err(|e| DaemonError::Internal(format!("logger init failed: {e}")))?;
    Ok(())
}

fn build_writer(config: &LogConfig) -> Result<BoxMakeWriter> {
    let mut writer: Option<BoxMakeWriter> = None;

    if config.to_stdout {
        writer = Some(combine(writer, BoxMakeWriter::new(std::io::stdout)));
    }
    if config.to_stderr {
        writer = Some(combine(writer, BoxMakeWriter::new(std::io::stderr)));
    }
    if config.to_file {
        let path = config.file.clone().ok_or_else(|| {
            DaemonError::Config("log.to_file is set but log.file is missing".to_string())
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                DaemonError::Config(format!("cannot open log file '{}': {e}", path.display()))
            })?;
        writer = Some(combine(writer, BoxMakeWriter::new(Arc::new(file))));
    }

    // All sinks disabled: run silent rather than refusing to start.
    Ok(writer.unwrap_or_else(|| BoxMakeWriter::new(std::io::sink)))
}

fn combine(current: Option<BoxMakeWriter>, next: BoxMakeWriter) -> BoxMakeWriter {
    match current {
        Some(existing) => BoxMakeWriter::new(existing.and(next)),
        None => next,
    }
}
