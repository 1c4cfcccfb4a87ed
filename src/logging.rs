use std::fs::{File, OpenOptions};
use std::path::Path;
use thiserror::Error;

use crate::web::config::LogConfig;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log level: {0}")]
    Level(#[from] log::ParseLevelError),
    #[error("Cannot open log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Logger already initialized: {0}")]
    Init(#[from] log::SetLoggerError),
}

/// Installs the global logger. `RUST_LOG`, when set, overrides the
/// configured level.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let level: log::LevelFilter = config.level.parse()?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();

    if let Some(path) = &config.file {
        let file = open_log_file(path).map_err(|source| LogError::File {
            path: path.display().to_string(),
            source,
        })?;
        builder
            .target(env_logger::Target::Pipe(Box::new(file)))
            .write_style(env_logger::WriteStyle::Never);
    }

    builder.try_init()?;
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}
