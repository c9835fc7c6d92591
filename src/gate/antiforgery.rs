use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use serde::Deserialize;
use subtle::ConstantTimeEq;

pub const TOKEN_HEADER: &str = "x-anti-forgery-token";
pub const TOKEN_FIELD: &str = "__RequestVerificationToken";
pub const MAX_FORM_SIZE: usize = 8 * 1024;

#[derive(Debug, Default, Deserialize)]
struct TokenForm {
    #[serde(rename = "__RequestVerificationToken")]
    token: Option<String>,
}

/// Token submitted with a state-changing request, from the header or the form body.
pub fn submitted_token(parts: &Parts, body: &[u8]) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        return Some(token.to_string());
    }

    let is_form = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return None;
    }

    serde_urlencoded::from_bytes::<TokenForm>(body)
        .ok()
        .and_then(|form| form.token)
}

/// Compare a submitted token to the session's, in time independent of where they differ.
pub fn verify(submitted: Option<&str>, expected: &str) -> bool {
    let Some(submitted) = submitted else {
        return false;
    };

    let (a, b) = (submitted.as_bytes(), expected.as_bytes());
    if a.is_empty() || a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}
