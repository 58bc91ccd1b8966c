use std::str::Utf8Error;

use packed_struct::PackingError;

/// When things go awry
#[derive(Debug)]
pub enum RadGuardError {
    ConfigError(String),
    DecodeError(String),
    EncodeError(String),
    BytePackingError(String),
    IoError(std::io::Error),
    /// Something failed in the start up of the platform
    StartupError(String),
    StoreError(String),
    FileError(String),
    EmptyFile,
    /// Failed to send something across a tokio channel
    SendError(String),
    Utf8Error(Utf8Error),
    /// A reply directive couldn't be evaluated; carries the Reply-Message text
    DirectiveError(String),
    Generic(String),
    Regex(String),
    InvalidValue(String),
}

impl std::fmt::Display for RadGuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for RadGuardError {}

impl From<regex::Error> for RadGuardError {
    fn from(error: regex::Error) -> Self {
        RadGuardError::Regex(error.to_string())
    }
}

impl From<std::io::Error> for RadGuardError {
    fn from(error: std::io::Error) -> Self {
        RadGuardError::IoError(error)
    }
}

impl From<redis::RedisError> for RadGuardError {
    fn from(error: redis::RedisError) -> Self {
        RadGuardError::StoreError(error.to_string())
    }
}

impl From<PackingError> for RadGuardError {
    fn from(error: PackingError) -> Self {
        RadGuardError::BytePackingError(error.to_string())
    }
}

impl From<Utf8Error> for RadGuardError {
    fn from(error: Utf8Error) -> Self {
        RadGuardError::Utf8Error(error)
    }
}

impl From<serde_json::Error> for RadGuardError {
    fn from(error: serde_json::Error) -> Self {
        RadGuardError::ConfigError(error.to_string())
    }
}

impl From<config::ConfigError> for RadGuardError {
    fn from(error: config::ConfigError) -> Self {
        RadGuardError::ConfigError(error.to_string())
    }
}

impl From<RadGuardError> for std::io::Error {
    fn from(error: RadGuardError) -> Self {
        match error {
            RadGuardError::IoError(err) => err,
            RadGuardError::StartupError(err) => std::io::Error::other(err),
            RadGuardError::StoreError(err) => std::io::Error::other(err),
            RadGuardError::FileError(err) => std::io::Error::other(err),
            RadGuardError::EmptyFile => std::io::Error::other("Empty file"),
            RadGuardError::SendError(err) => std::io::Error::other(err),
            _ => std::io::Error::other(format!("{error:?}")),
        }
    }
}
