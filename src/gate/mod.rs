pub mod antiforgery;
pub mod authentication;
mod error;
pub mod login;
pub mod logout;
pub mod metadata;
pub mod principal;
pub mod return_url;
pub mod server;
pub mod session;

pub use authentication::{AuthenticationGate, GateOutcome, SessionHandle};
pub use error::Error;
pub use principal::Principal;
