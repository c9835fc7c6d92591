use redis::RedisError;
use std::fmt;
use tracing::debug;

#[derive(Debug, PartialEq)]
pub enum Error {
    StorageError(String),
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::StorageError(err) => write!(f, "Storage error: {err}"),
            Error::Serialization(err) => write!(f, "Serialization error: {err}"),
        }
    }
}

impl From<RedisError> for Error {
    fn from(error: RedisError) -> Self {
        let error = format!("Redis error: {error}");
        debug!("{error}");
        Error::StorageError(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Session record (de)serialization error: {error}");
        Error::Serialization(error.to_string())
    }
}
