use crate::gate::server::handlers::{
    handle_antiforgery_token, handle_attributes, handle_home, handle_identity, handle_login,
    handle_logout,
};
use crate::gate::server::middleware::{guard, RequestContext};
use crate::gate::server::route::{self, Route};
use crate::gate::server::{ResponseBody, ServerContext};
use crate::gate::Error;
use crate::metrics_provider::{IN_FLIGHT_REQUESTS, METRICS_PROVIDER};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub async fn serve_request<S>(stream: TokioIo<S>, context: Arc<ServerContext>, peer: SocketAddr)
where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let timeouts = context.timeouts;
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |request| handle_request(Arc::clone(&context), request, peer)),
    );
    pin!(conn);

    IN_FLIGHT_REQUESTS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    METRICS_PROVIDER.metric_http_request_in_flight.set(
        i64::try_from(IN_FLIGHT_REQUESTS.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(i64::MAX),
    );

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    IN_FLIGHT_REQUESTS.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    METRICS_PROVIDER.metric_http_request_in_flight.set(
        i64::try_from(IN_FLIGHT_REQUESTS.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(i64::MAX),
    );
}

#[instrument(skip(context, request))]
async fn handle_request(
    context: Arc<ServerContext>,
    request: Request<Incoming>,
    peer: SocketAddr,
) -> Result<Response<ResponseBody>, Infallible> {
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match router(context, request, Some(peer)).await {
        Ok(response) => response,
        Err(error) => {
            let details = trace_id
                .as_ref()
                .map(|trace_id| json!({"trace_id": trace_id}))
                .unwrap_or(json!({}));
            error_to_response(&error, details)
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER.metric_http_request_total.inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

#[instrument(skip(context, request))]
pub async fn router<B>(
    context: Arc<ServerContext>,
    request: Request<B>,
    peer: Option<SocketAddr>,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = request.into_parts();
    let route = route::parse(&parts.method, &parts.uri, &context.login_path);

    if route.is_protected() {
        return guard(&context, &parts, peer, |request| {
            protected_route(&context, route, &parts, request, body)
        })
        .await;
    }

    match route {
        Route::Unknown => Err(Error::NotFound),
        Route::MethodNotAllowed => Err(Error::MethodNotAllowed),
        Route::Home => handle_home(&context, &parts).await,
        Route::Login => handle_login(&context, &parts),
        Route::Healthz => Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(ResponseBody::fixed(r#"{"status":"ok"}"#))?),
        Route::Metrics => {
            let (content_type, metrics) = METRICS_PROVIDER.gather()?;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, content_type)
                .body(ResponseBody::fixed(metrics))?)
        }
        Route::Identity | Route::Attributes | Route::AntiForgeryToken | Route::Logout => {
            Err(Error::Internal(format!("{route:?} reached without the gate")))
        }
    }
}

async fn protected_route<B>(
    context: &ServerContext,
    route: Route,
    parts: &Parts,
    request: RequestContext,
    body: B,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match route {
        Route::Identity => handle_identity(&request),
        Route::Attributes => handle_attributes(&request),
        Route::AntiForgeryToken => handle_antiforgery_token(&request),
        Route::Logout => handle_logout(context, parts, request, body).await,
        _ => Err(Error::NotFound),
    }
}

pub fn error_to_response<T>(error: &Error, details: T) -> Response<ResponseBody>
where
    T: Serialize,
{
    let (status, code) = match error {
        Error::NoTrustedIdentity(_) => (StatusCode::FOUND, "UNAUTHENTICATED"),
        Error::SessionStoreUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "SESSION_STORE_UNAVAILABLE")
        }
        Error::InvalidAntiForgeryToken => (StatusCode::FORBIDDEN, "INVALID_ANTIFORGERY_TOKEN"),
        Error::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED"),
        Error::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
    };

    // Backend failure details stay in the logs.
    let message = match error {
        Error::SessionStoreUnavailable(_) => "session store unavailable".to_string(),
        Error::Internal(_) => "internal server error".to_string(),
        _ => error.to_string(),
    };

    let body = json!({
        "errors": [{
            "code": code,
            "message": message,
            "detail": details
        }]
    });

    let mut response = Response::new(ResponseBody::fixed(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Error::NoTrustedIdentity(redirect) = error {
        match HeaderValue::from_str(redirect.location()) {
            Ok(location) => {
                response.headers_mut().insert(LOCATION, location);
            }
            Err(_) => *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::authentication::tests::test_config;
    use crate::gate::login::RedirectTarget;
    use crate::gate::session::{self, MockSessionStore};
    use http_body_util::{BodyExt, Full};
    use hyper::header::SET_COOKIE;
    use hyper::Method;
    use serde_json::Value;

    const PEER: &str = "127.0.0.1:41000";

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(&test_config()).unwrap())
    }

    fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: &str) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
    }

    async fn send(
        context: &Arc<ServerContext>,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, Error> {
        router(Arc::clone(context), request, Some(PEER.parse().unwrap())).await
    }

    async fn json_body(response: Response<ResponseBody>) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn header(response: &Response<ResponseBody>, name: hyper::header::HeaderName) -> String {
        response
            .headers()
            .get(name)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Authenticate through the SSO metadata and return the session cookie pair and the
    /// anti-forgery token.
    async fn login(context: &Arc<ServerContext>) -> (String, String) {
        let response = send(
            context,
            request(
                Method::GET,
                "/shibboleth",
                &[("eppn", "jdoe@school.edu"), ("givenname", "jANE")],
                "",
            ),
        )
        .await
        .unwrap();

        let set_cookie = header(&response, SET_COOKIE);
        let cookie = set_cookie.split(';').next().unwrap().to_string();
        let token = json_body(response).await["antiforgery_token"]
            .as_str()
            .unwrap()
            .to_string();
        (cookie, token)
    }

    #[tokio::test]
    async fn test_healthz_and_metrics_are_unprotected() {
        let context = context();

        let response = send(&context, request(Method::GET, "/healthz", &[], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "ok"}));

        let response = send(&context, request(Method::GET, "/metrics", &[], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let context = context();

        let result = send(&context, request(Method::GET, "/admin", &[], "")).await;
        assert!(matches!(result, Err(Error::NotFound)));

        let result = send(&context, request(Method::GET, "/account/logout", &[], "")).await;
        assert!(matches!(result, Err(Error::MethodNotAllowed)));
    }

    #[tokio::test]
    async fn test_protected_route_redirects_to_login() {
        let context = context();

        let result = send(&context, request(Method::GET, "/shibboleth?a=1", &[], "")).await;
        assert_eq!(
            result.err(),
            Some(Error::NoTrustedIdentity(RedirectTarget::new(
                "/account/login?returnUrl=%2Fshibboleth%3Fa%3D1"
            )))
        );

        let result = send(
            &context,
            request(Method::POST, "/account/logout", &[], ""),
        )
        .await;
        assert!(matches!(result, Err(Error::NoTrustedIdentity(_))));
    }

    #[tokio::test]
    async fn test_identity_view() {
        let context = context();

        let response = send(
            &context,
            request(
                Method::GET,
                "/shibboleth",
                &[
                    ("eppn", "jdoe@school.edu"),
                    ("givenname", "mary-ANNE"),
                    ("unscopedaffiliation", "faculty;staff"),
                ],
                "",
            ),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, SET_COOKIE).starts_with("shibgate_session="));

        let body = json_body(response).await;
        assert_eq!(body["display_identity"], "Mary-Anne");
        assert_eq!(body["principal_name"], "jdoe@school.edu");
        assert_eq!(body["roles"], json!(["faculty", "staff"]));
        assert_eq!(body["antiforgery_token"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_attribute_listing() {
        let context = context();

        let response = send(
            &context,
            request(
                Method::GET,
                "/shibboleth/attributes",
                &[("eppn", "jdoe@school.edu"), ("mail", "jdoe@school.edu")],
                "",
            ),
        )
        .await
        .unwrap();

        let body = json_body(response).await;
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(
            entries[0],
            json!({"name": "eduPersonPrincipalName", "value": "jdoe@school.edu"})
        );
        assert_eq!(entries[4], json!({"name": "mail", "value": "jdoe@school.edu"}));
        assert_eq!(entries[1], json!({"name": "givenName", "value": ""}));
    }

    #[tokio::test]
    async fn test_session_carries_identity() {
        let context = context();
        let (cookie, token) = login(&context).await;

        let response = send(
            &context,
            request(Method::GET, "/account/antiforgery", &[("cookie", cookie.as_str())], ""),
        )
        .await
        .unwrap();

        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(json_body(response).await, json!({ "token": token }));
    }

    #[tokio::test]
    async fn test_home() {
        let context = context();

        let response = send(&context, request(Method::GET, "/", &[], ""))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await,
            json!({"authenticated": false, "login": "/account/login"})
        );

        let (cookie, _) = login(&context).await;
        let response = send(
            &context,
            request(Method::GET, "/", &[("cookie", cookie.as_str())], ""),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), "/shibboleth");
    }

    #[tokio::test]
    async fn test_login_returns_to_original_url() {
        let context = context();

        let response = send(
            &context,
            request(
                Method::GET,
                "/account/login?returnUrl=%2Fshibboleth%2Fattributes%3Ftab%3Dall",
                &[],
                "",
            ),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), "/shibboleth/attributes?tab=all");

        for uri in [
            "/account/login",
            "/account/login?returnUrl=",
            "/account/login?returnUrl=https%3A%2F%2Fevil.example.com%2F",
            "/account/login?returnUrl=%2F%C3%BC",
            "/account/login?returnUrl=%2Fa%20b",
        ] {
            let response = send(&context, request(Method::GET, uri, &[], ""))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FOUND, "{uri}");
            assert_eq!(header(&response, LOCATION), "/", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_logout_with_header_token() {
        let context = context();
        let (cookie, token) = login(&context).await;

        let response = send(
            &context,
            request(
                Method::POST,
                "/account/logout",
                &[("cookie", cookie.as_str()), ("x-anti-forgery-token", token.as_str())],
                "",
            ),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), "/Shibboleth.sso/Logout");
        assert!(header(&response, SET_COOKIE).contains("Max-Age=0"));

        let result = send(
            &context,
            request(Method::GET, "/shibboleth", &[("cookie", cookie.as_str())], ""),
        )
        .await;
        assert!(matches!(result, Err(Error::NoTrustedIdentity(_))));
    }

    #[tokio::test]
    async fn test_logout_with_form_token() {
        let context = context();
        let (cookie, token) = login(&context).await;

        let body = format!("__RequestVerificationToken={token}");
        let response = send(
            &context,
            request(
                Method::POST,
                "/account/logout",
                &[
                    ("cookie", cookie.as_str()),
                    ("content-type", "application/x-www-form-urlencoded"),
                ],
                &body,
            ),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), "/Shibboleth.sso/Logout");
    }

    #[tokio::test]
    async fn test_logout_rejects_forged_request() {
        let context = context();
        let (cookie, _) = login(&context).await;

        let result = send(
            &context,
            request(
                Method::POST,
                "/account/logout",
                &[("cookie", cookie.as_str()), ("x-anti-forgery-token", "forged")],
                "",
            ),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAntiForgeryToken)));

        let response = send(
            &context,
            request(Method::GET, "/shibboleth", &[("cookie", cookie.as_str())], ""),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logout_rejects_oversized_form() {
        let context = context();
        let (cookie, token) = login(&context).await;

        let body = format!(
            "padding={}&__RequestVerificationToken={token}",
            "x".repeat(9 * 1024)
        );
        let result = send(
            &context,
            request(
                Method::POST,
                "/account/logout",
                &[
                    ("cookie", cookie.as_str()),
                    ("content-type", "application/x-www-form-urlencoded"),
                ],
                &body,
            ),
        )
        .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_failed_request_discards_issued_session() {
        let issued = Arc::new(std::sync::Mutex::new(String::new()));

        let mut store = MockSessionStore::new();
        let saved = Arc::clone(&issued);
        store
            .expect_save()
            .times(1)
            .returning(move |session_id, _, _| {
                *saved.lock().unwrap() = session_id.to_string();
                Ok(())
            });
        let cleared = Arc::clone(&issued);
        store
            .expect_clear()
            .withf(move |session_id| *cleared.lock().unwrap() == *session_id)
            .times(1)
            .returning(|_| Ok(()));
        let context = Arc::new(ServerContext::with_store(&test_config(), Arc::new(store)));

        let result = send(
            &context,
            request(
                Method::POST,
                "/account/logout",
                &[("eppn", "jdoe@school.edu"), ("x-anti-forgery-token", "forged")],
                "",
            ),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAntiForgeryToken)));
        assert_eq!(issued.lock().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let mut store = MockSessionStore::new();
        store
            .expect_load()
            .returning(|_| Err(session::Error::StorageError("connection refused".to_string())));
        let context = Arc::new(ServerContext::with_store(&test_config(), Arc::new(store)));

        let result = send(
            &context,
            request(
                Method::GET,
                "/shibboleth",
                &[("cookie", "shibgate_session=0123456789abcdef0123456789abcdef")],
                "",
            ),
        )
        .await;
        assert!(matches!(result, Err(Error::SessionStoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_error_to_response() {
        let redirect = RedirectTarget::new("/account/login?returnUrl=%2F");
        let response = error_to_response(&Error::NoTrustedIdentity(redirect), json!({}));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), "/account/login?returnUrl=%2F");

        let error = Error::SessionStoreUnavailable("redis://secret@host refused".to_string());
        let response = error_to_response(&error, json!({"trace_id": "abc"}));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await,
            json!({"errors": [{
                "code": "SESSION_STORE_UNAVAILABLE",
                "message": "session store unavailable",
                "detail": {"trace_id": "abc"}
            }]})
        );

        let response = error_to_response(&Error::InvalidAntiForgeryToken, json!({}));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = error_to_response(&Error::MethodNotAllowed, json!({}));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
