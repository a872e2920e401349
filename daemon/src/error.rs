//! Typed failures crossing module boundaries inside the daemon.
//!
//! None of these escape the event loop: callers log them and carry on.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The renderer process could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("renderer argv is empty")]
    EmptyArgv,
    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("spawned '{program}' without a {stream} pipe")]
    MissingPipe { program: String, stream: &'static str },
}

/// A call to the renderer over the session bus failed.
#[derive(Debug, Clone, Error)]
pub enum IpcError {
    /// No bus connection, nobody owns the renderer name, or the object is not exported.
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
    /// The renderer answered with an error.
    #[error("renderer call failed: {0}")]
    CallFailed(String),
}

impl IpcError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IpcError::Unavailable(_))
    }
}

impl From<zbus::Error> for IpcError {
    fn from(err: zbus::Error) -> Self {
        const UNAVAILABLE: [&str; 4] = [
            "org.freedesktop.DBus.Error.ServiceUnknown",
            "org.freedesktop.DBus.Error.NameHasNoOwner",
            "org.freedesktop.DBus.Error.UnknownObject",
            "org.freedesktop.DBus.Error.NoReply",
        ];
        match &err {
            zbus::Error::InputOutput(_) | zbus::Error::Address(_) | zbus::Error::Handshake(_) => {
                IpcError::Unavailable(err.to_string())
            }
            zbus::Error::MethodError(name, _, _) if UNAVAILABLE.contains(&name.as_str()) => {
                IpcError::Unavailable(err.to_string())
            }
            zbus::Error::FDO(fdo) => match fdo.as_ref() {
                zbus::fdo::Error::ServiceUnknown(_)
                | zbus::fdo::Error::NameHasNoOwner(_)
                | zbus::fdo::Error::UnknownObject(_)
                | zbus::fdo::Error::NoReply(_) => IpcError::Unavailable(err.to_string()),
                _ => IpcError::CallFailed(err.to_string()),
            },
            _ => IpcError::CallFailed(err.to_string()),
        }
    }
}

/// Persisting a derived value (status file, startup marker) failed.
#[derive(Debug, Error)]
pub enum ConfigWriteError {
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
