use crate::gate::server::cookies::session_cookie;
use crate::gate::server::{ResponseBody, ServerContext};
use crate::gate::{Error, GateOutcome, Principal, SessionHandle};
use hyper::header::{HeaderValue, SET_COOKIE};
use hyper::http::request::Parts;
use hyper::Response;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// What a protected handler gets to see about its caller.
#[derive(Debug)]
pub struct RequestContext {
    pub principal: Principal,
    pub session: SessionHandle,
}

/// Run `next` only when the authentication gate lets the request through.
///
/// An unauthenticated request never reaches `next` and yields
/// [`Error::NoTrustedIdentity`] carrying the login redirect. A session created by the gate on
/// this request is announced to the client with a `Set-Cookie` on the handler's response.
pub async fn guard<F, Fut>(
    context: &ServerContext,
    parts: &Parts,
    peer: Option<SocketAddr>,
    next: F,
) -> Result<Response<ResponseBody>, Error>
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = Result<Response<ResponseBody>, Error>>,
{
    match context.gate.evaluate(parts, peer).await? {
        GateOutcome::Unauthenticated { redirect } => Err(Error::NoTrustedIdentity(redirect)),
        GateOutcome::Authenticated {
            principal, session, ..
        } => {
            let issued = session.issued.then(|| session.id.clone());
            let mut response = match next(RequestContext { principal, session }).await {
                Ok(response) => response,
                Err(error) => {
                    if let Some(session_id) = issued {
                        discard_session(context, &session_id).await;
                    }
                    return Err(error);
                }
            };

            if let Some(session_id) = issued {
                let cookie = session_cookie(&context.session, &session_id).to_string();
                let cookie = HeaderValue::from_str(&cookie)
                    .map_err(|error| Error::Internal(format!("invalid session cookie: {error}")))?;
                response.headers_mut().append(SET_COOKIE, cookie);
            }

            Ok(response)
        }
    }
}

/// The client never learns about a session issued for a failed request, so drop it.
async fn discard_session(context: &ServerContext, session_id: &str) {
    match context.gate.store().clear(session_id).await {
        Ok(()) => debug!("Discarded session issued for a failed request"),
        Err(error) => warn!("Unable to discard session issued for a failed request: {error}"),
    }
}
