use crate::gate::login::build_login_redirect;
use crate::gate::logout::logout;
use crate::gate::return_url::parse_return_url;
use crate::gate::server::cookies::clear_session_cookie;
use crate::gate::server::middleware::RequestContext;
use crate::gate::server::request_ext::read_body;
use crate::gate::server::route::IDENTITY;
use crate::gate::server::{ResponseBody, ServerContext};
use crate::gate::{antiforgery, Error};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::http::request::Parts;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

fn json_response<T: Serialize>(value: &T) -> Result<Response<ResponseBody>, Error> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(ResponseBody::fixed(body))?)
}

fn redirect_response(location: &str) -> Result<Response<ResponseBody>, Error> {
    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .body(ResponseBody::empty())?)
}

pub async fn handle_home(
    context: &ServerContext,
    parts: &Parts,
) -> Result<Response<ResponseBody>, Error> {
    if context.gate.bound_principal(parts).await?.is_some() {
        return redirect_response(IDENTITY);
    }

    json_response(&json!({
        "authenticated": false,
        "login": context.login_path,
    }))
}

/// Landing point of the SSO round trip: the agent has negotiated the login by the time the
/// request gets here.
pub fn handle_login(
    context: &ServerContext,
    parts: &Parts,
) -> Result<Response<ResponseBody>, Error> {
    let return_url = parse_return_url(parts.uri.query());
    let target = build_login_redirect(&return_url, &context.application_root);

    debug!(location = target.location(), "Login completed, returning");
    redirect_response(target.location())
}

pub fn handle_identity(request: &RequestContext) -> Result<Response<ResponseBody>, Error> {
    json_response(&json!({
        "display_identity": request.principal.display_identity(),
        "principal_name": request.principal.principal_name,
        "roles": request.principal.roles,
        "antiforgery_token": request.session.antiforgery_token,
    }))
}

pub fn handle_attributes(request: &RequestContext) -> Result<Response<ResponseBody>, Error> {
    json_response(&request.principal.attributes())
}

pub fn handle_antiforgery_token(
    request: &RequestContext,
) -> Result<Response<ResponseBody>, Error> {
    json_response(&json!({ "token": request.session.antiforgery_token }))
}

pub async fn handle_logout<B>(
    context: &ServerContext,
    parts: &Parts,
    request: RequestContext,
    body: B,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = read_body(body, antiforgery::MAX_FORM_SIZE).await?;
    let token = antiforgery::submitted_token(parts, &body);

    let target = logout(
        context.gate.store().as_ref(),
        &request.session,
        token.as_deref(),
        &context.logout_path,
    )
    .await?;

    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, target.location())
        .header(SET_COOKIE, clear_session_cookie(&context.session).to_string())
        .body(ResponseBody::empty())?)
}
