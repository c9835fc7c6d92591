use crate::gate::login::RedirectTarget;
use crate::gate::session;
use std::fmt::Display;
use tracing::{debug, error, warn};

#[derive(Debug, PartialEq)]
pub enum Error {
    /// No identity metadata and no bound session; answered with a redirect into the login
    /// flow.
    NoTrustedIdentity(RedirectTarget),
    SessionStoreUnavailable(String),
    InvalidAntiForgeryToken,
    MethodNotAllowed,
    NotFound,
    BadRequest(String),
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoTrustedIdentity(_) => write!(f, "no trusted identity"),
            Error::SessionStoreUnavailable(s) => write!(f, "session store unavailable: {s}"),
            Error::InvalidAntiForgeryToken => write!(f, "invalid anti-forgery token"),
            Error::MethodNotAllowed => write!(f, "method not allowed"),
            Error::NotFound => write!(f, "resource not found"),
            Error::BadRequest(s) => write!(f, "bad request: {s}"),
            Error::Internal(s) => write!(f, "internal server error: {s}"),
        }
    }
}

impl From<session::Error> for Error {
    fn from(error: session::Error) -> Self {
        error!("Session store error: {error}");
        Error::SessionStoreUnavailable(error.to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(error: hyper::http::Error) -> Self {
        warn!("Hyper HTTP error: {:?}", error);
        Error::Internal("HTTP error during operations".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Serde JSON error: {:?}", error);
        Error::Internal("(De)Serialization error during operations".to_string())
    }
}
