use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lease {key:?} not found")]
    NotFound { key: String },

    #[error("Lease {key:?} already exists")]
    AlreadyExists { key: String },

    #[error("Lease {key:?} is held by another identity, {identity:?} is not the holder")]
    NotHolder { key: String, identity: String },

    #[error("Operation on lease {key:?} was cancelled")]
    Cancelled { key: String },

    #[error("Operation on lease {key:?} did not finish within {timeout:?}")]
    DeadlineExceeded { key: String, timeout: Duration },

    #[error("Invalid lease record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. } | Error::NotHolder { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Transport(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Transport(anyhow::Error::new(err).context("lease record codec"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
