use std::fmt;
use std::io;

/// Startup-path error. Never surfaces on the per-connection dispatch path —
/// that path keeps returning the raw status codes the protocol contract
/// expects instead of propagating a typed error.
#[derive(Debug)]
pub enum StartupError {
    MissingField(&'static str),
    Config(String),
    Io(io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::MissingField(field) => write!(f, "missing required config field `{}`", field),
            StartupError::Config(msg) => write!(f, "invalid config: {}", msg),
            StartupError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for StartupError {}

impl From<io::Error> for StartupError {
    fn from(err: io::Error) -> Self {
        StartupError::Io(err)
    }
}
