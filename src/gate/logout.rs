use crate::gate::authentication::SessionHandle;
use crate::gate::login::RedirectTarget;
use crate::gate::session::SessionStore;
use crate::gate::{antiforgery, Error};
use crate::metrics_provider::LOGOUTS;
use tracing::{info, instrument, warn};

/// End the caller's session and hand the client over to the SSO agent's logout endpoint.
///
/// The submitted anti-forgery token must match the session's before anything is touched.
/// A session that could not be cleared is reported as an error; the caller must not be told
/// they are logged out while their session is still usable.
#[instrument(skip_all)]
pub async fn logout(
    store: &dyn SessionStore,
    session: &SessionHandle,
    submitted_token: Option<&str>,
    logout_path: &str,
) -> Result<RedirectTarget, Error> {
    if !antiforgery::verify(submitted_token, &session.antiforgery_token) {
        warn!("Logout rejected: anti-forgery token mismatch");
        LOGOUTS.with_label_values(&["rejected"]).inc();
        return Err(Error::InvalidAntiForgeryToken);
    }

    if let Err(error) = store.clear(&session.id).await {
        LOGOUTS.with_label_values(&["error"]).inc();
        return Err(error.into());
    }

    info!("Session cleared, forwarding to SSO logout");
    LOGOUTS.with_label_values(&["success"]).inc();
    Ok(RedirectTarget::new(logout_path))
}
