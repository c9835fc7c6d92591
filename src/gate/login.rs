use crate::gate::return_url::is_local_url;
use tracing::warn;

/// Where a redirect response sends the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectTarget(String);

impl RedirectTarget {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn location(&self) -> &str {
        &self.0
    }
}

/// Resolve the destination of a completed login round trip.
///
/// The SSO agent negotiates the login before the request reaches the login path; by then
/// only the return URL is left to interpret. An empty return URL lands on the application
/// root, and so does anything that is not a path on this origin.
pub fn build_login_redirect(return_url: &str, application_root: &str) -> RedirectTarget {
    if return_url.is_empty() {
        return RedirectTarget::new(application_root);
    }

    if !is_local_url(return_url) {
        warn!("Refusing non-local return URL, redirecting to the application root");
        return RedirectTarget::new(application_root);
    }

    RedirectTarget::new(return_url)
}
