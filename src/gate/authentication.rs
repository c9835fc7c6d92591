use crate::configuration::{Configuration, SessionFallback};
use crate::gate::login::RedirectTarget;
use crate::gate::metadata::IdentityExtractor;
use crate::gate::principal::Principal;
use crate::gate::return_url::ReturnUrl;
use crate::gate::session::{new_session_id, SessionRecord, SessionStore};
use crate::gate::Error;
use crate::metrics_provider::GATE_DECISIONS;
use cookie::Cookie;
use hyper::header::COOKIE;
use hyper::http::request::Parts;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentitySource {
    /// Fresh metadata injected by the SSO agent on this request.
    Metadata,
    /// Principal name previously bound to the caller's session.
    Session,
}

/// The session an authenticated request runs under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub antiforgery_token: String,
    /// Set when the gate created the session on this request and the client must be told
    /// its identifier.
    pub issued: bool,
}

#[derive(Debug, PartialEq)]
pub enum GateOutcome {
    Authenticated {
        principal: Principal,
        session: SessionHandle,
        source: IdentitySource,
    },
    Unauthenticated {
        redirect: RedirectTarget,
    },
}

/// Decides, for each request to a protected route, whether a trusted identity is present.
///
/// Evaluation order:
/// 1. a non-empty principal name in the trusted metadata authenticates the request and is
///    (re)bound to the session;
/// 2. otherwise a principal name already bound to the session authenticates it, unless the
///    session fallback is denied;
/// 3. otherwise the request is turned into a redirect to the login path that carries the
///    original path-and-query.
///
/// Session store failures are returned as errors and never grant access.
pub struct AuthenticationGate {
    extractor: IdentityExtractor,
    store: Arc<dyn SessionStore>,
    login_path: String,
    application_root: String,
    session_fallback: SessionFallback,
    cookie_name: String,
    session_ttl: u64,
}

impl AuthenticationGate {
    pub fn new(config: &Configuration, store: Arc<dyn SessionStore>) -> Self {
        Self {
            extractor: IdentityExtractor::new(&config.sso),
            store,
            login_path: config.sso.login_path.clone(),
            application_root: config.sso.application_root.clone(),
            session_fallback: config.sso.session_fallback,
            cookie_name: config.session.cookie_name.clone(),
            session_ttl: config.session.ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Session identifier presented by the client, if well-formed.
    pub fn session_id(&self, parts: &Parts) -> Option<String> {
        parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == self.cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|id| is_session_id(id))
    }

    /// Principal name bound to the caller's session, without evaluating metadata.
    pub async fn bound_principal(&self, parts: &Parts) -> Result<Option<String>, Error> {
        let Some(session_id) = self.session_id(parts) else {
            return Ok(None);
        };

        let record = self.store.load(&session_id).await?;
        Ok(record.and_then(|record| record.bound_principal().map(ToString::to_string)))
    }

    #[instrument(skip(self, parts), fields(source = tracing::field::Empty))]
    pub async fn evaluate(
        &self,
        parts: &Parts,
        peer: Option<SocketAddr>,
    ) -> Result<GateOutcome, Error> {
        let session_id = self.session_id(parts);
        let metadata = self.extractor.metadata(parts, peer);

        if let Some(principal) = Principal::from_metadata(&metadata) {
            tracing::Span::current().record("source", "metadata");
            let session = self
                .bind(session_id, &principal.principal_name)
                .await
                .inspect_err(|_| {
                    GATE_DECISIONS.with_label_values(&["store", "error"]).inc();
                })?;

            debug!(
                principal = %principal.principal_name,
                "Authenticated from trusted metadata"
            );
            GATE_DECISIONS
                .with_label_values(&["metadata", "authenticated"])
                .inc();
            return Ok(GateOutcome::Authenticated {
                principal,
                session,
                source: IdentitySource::Metadata,
            });
        }

        if let (SessionFallback::Allow, Some(session_id)) = (self.session_fallback, session_id) {
            let record = self.store.load(&session_id).await.inspect_err(|_| {
                GATE_DECISIONS.with_label_values(&["store", "error"]).inc();
            })?;

            if let Some(record) = record {
                if let Some(principal) = record.bound_principal().and_then(Principal::from_session)
                {
                    tracing::Span::current().record("source", "session");
                    debug!(
                        principal = %principal.principal_name,
                        "Authenticated from session"
                    );
                    GATE_DECISIONS
                        .with_label_values(&["session", "authenticated"])
                        .inc();
                    return Ok(GateOutcome::Authenticated {
                        principal,
                        session: SessionHandle {
                            id: session_id,
                            antiforgery_token: record.antiforgery_token,
                            issued: false,
                        },
                        source: IdentitySource::Session,
                    });
                }
            }
        }

        tracing::Span::current().record("source", "none");
        GATE_DECISIONS.with_label_values(&["none", "redirect"]).inc();

        let return_url = ReturnUrl::capture(&parts.uri, &self.application_root);
        debug!(return_url = return_url.as_str(), "No trusted identity, redirecting to login");
        Ok(GateOutcome::Unauthenticated {
            redirect: RedirectTarget::new(return_url.login_location(&self.login_path)),
        })
    }

    /// Bind a principal name to the caller's session.
    ///
    /// The presented session is kept when it is already bound to the same principal. Any
    /// other presented session is discarded and a new identifier issued, so that a session
    /// identifier planted before login never becomes authenticated.
    async fn bind(
        &self,
        session_id: Option<String>,
        principal_name: &str,
    ) -> Result<SessionHandle, Error> {
        let existing = match session_id {
            Some(id) => self.store.load(&id).await?.map(|record| (id, record)),
            None => None,
        };

        let (id, record, issued) = match existing {
            Some((id, record)) if record.bound_principal() == Some(principal_name) => {
                (id, record, false)
            }
            Some((old_id, _)) => {
                info!(principal = %principal_name, "Principal changed, rotating session");
                self.store.clear(&old_id).await?;
                (new_session_id(), SessionRecord::new(principal_name), true)
            }
            None => (new_session_id(), SessionRecord::new(principal_name), true),
        };

        self.store.save(&id, &record, self.session_ttl).await?;

        Ok(SessionHandle {
            id,
            antiforgery_token: record.antiforgery_token,
            issued,
        })
    }
}

fn is_session_id(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
