use std::{fmt, io};

/// Top-level error taxonomy for the proxy.
///
/// Distinguishes the handful of failure shapes the rest of the crate needs to reason
/// about differently: a malformed configuration record is reported and discarded, a
/// bind failure is fatal to the whole process, and an upstream failure is fatal only
/// to the session that owns the broken connection.
#[derive(Debug)]
pub enum Error {
    /// The listening socket could not be created or bound.
    Bind { address: String, source: io::Error },
    /// The upstream connection to the real broker could not be opened, or was lost.
    Upstream(anyhow::Error),
    /// A configuration record was malformed and has been discarded.
    Config(ConfigError),
    /// I/O failure unrelated to D-Bus itself (e.g. reading the config stream).
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bind { address, source } => {
                write!(f, "failed to listen on `{address}`: {source}")
            }
            Error::Upstream(e) => write!(f, "upstream connection error: {e}"),
            Error::Config(e) => write!(f, "configuration error: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind { source, .. } => Some(source),
            // anyhow::Error is itself a chain; its Display already renders full context.
            Error::Upstream(_) => None,
            Error::Config(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// A single malformed configuration record.
///
/// Config errors are never fatal: the loader logs them and keeps consuming the
/// stream, per spec (an operator streaming rule fragments should not have an
/// unrelated typo anywhere in the stream take the whole proxy down).
#[derive(Debug)]
pub enum ConfigError {
    /// The record was not valid JSON.
    InvalidJson(serde_json::Error),
    /// Neither `dbus-gateway-config-<section>` nor the legacy `dbus-proxy-config` key
    /// was present in the record.
    MissingSection { expected: String },
    /// The section key was present but its value was not a JSON array.
    SectionNotArray { section: String },
    /// A legacy plain-text rule line didn't have exactly 4 `;`-separated fields.
    MalformedLegacyLine { line: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidJson(e) => write!(f, "invalid JSON record: {e}"),
            ConfigError::MissingSection { expected } => {
                write!(f, "record is missing expected section `{expected}`")
            }
            ConfigError::SectionNotArray { section } => {
                write!(f, "section `{section}` is present but not an array")
            }
            ConfigError::MalformedLegacyLine { line } => {
                write!(f, "legacy rule line does not have 4 `;`-separated fields: `{line}`")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidJson(e) => Some(e),
            _ => None,
        }
    }
}
