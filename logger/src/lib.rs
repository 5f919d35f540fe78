// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

use std::path::{Path, PathBuf};

const LOG_LEVEL_ENV_VAR: &str = "KMS_LOG";

const LOG_FILE_PREFIX: &str = "kmscng";

#[derive(Debug)]
pub enum Error {
    OpenLogFile(PathBuf, std::io::Error),
    SetLogger(log::SetLoggerError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::OpenLogFile(path, _) => write!(f, "could not open log file {}", path.display()),
            Error::SetLogger(_) => f.write_str("could not set logger"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::OpenLogFile(_, err) => Some(err),
            Error::SetLogger(err) => Some(err),
        }
    }
}

/// Installs the process-wide logger.
///
/// With a `log_directory`, records are appended to `kmscng<filename_suffix>.log` in that directory.
/// Otherwise they go to stderr. The level defaults to `info` and can be overridden with `KMS_LOG`.
pub fn try_init(log_directory: Option<&Path>, filename_suffix: Option<&str>) -> Result<(), Error> {
    let mut builder = env_logger::Builder::new();

    if let Some(log_directory) = log_directory {
        let path = log_file_path(log_directory, filename_suffix);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| Error::OpenLogFile(path, err))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .format(|fmt, record| {
            use std::io::Write;

            let level = match record.level() {
                log::Level::Trace => "TRCE",
                log::Level::Debug => "DBUG",
                log::Level::Info => "INFO",
                log::Level::Warn => "WARN",
                log::Level::Error => "ERR!",
            };
            let timestamp = fmt.timestamp();

            if record.level() >= log::Level::Debug {
                writeln!(
                    fmt,
                    "<{}>{} [{}] - [{}] {}",
                    to_syslog_level(record.level()),
                    timestamp,
                    level,
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(
                    fmt,
                    "<{}>{} [{}] - {}",
                    to_syslog_level(record.level()),
                    timestamp,
                    level,
                    record.args()
                )
            }
        })
        .filter_level(log::LevelFilter::Info)
        .parse_env(LOG_LEVEL_ENV_VAR)
        .try_init()
        .map_err(Error::SetLogger)
}

fn log_file_path(log_directory: &Path, filename_suffix: Option<&str>) -> PathBuf {
    log_directory.join(format!(
        "{LOG_FILE_PREFIX}{}.log",
        filename_suffix.unwrap_or_default()
    ))
}

fn to_syslog_level(level: log::Level) -> i8 {
    match level {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 6,
        log::Level::Debug | log::Level::Trace => 7,
    }
}
