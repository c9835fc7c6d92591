use hyper::Uri;
use serde::Deserialize;

pub const RETURN_URL_PARAMETER: &str = "returnUrl";

/// The original request path-and-query, preserved across the login round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnUrl(String);

impl ReturnUrl {
    /// Capture the raw path-and-query of the request the gate turned away.
    pub fn capture(uri: &Uri, application_root: &str) -> Self {
        let path_and_query = uri.path_and_query().map_or("", |pq| pq.as_str());

        if path_and_query.is_empty() {
            Self(application_root.to_string())
        } else {
            Self(path_and_query.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Location` of the redirect into the login flow: the login-trigger path with the
    /// return URL form-encoded in its query.
    pub fn login_location(&self, login_path: &str) -> String {
        let query = serde_urlencoded::to_string([(RETURN_URL_PARAMETER, self.0.as_str())])
            .unwrap_or_default();
        format!("{login_path}?{query}")
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReturnUrlQuery {
    #[serde(rename = "returnUrl")]
    return_url: Option<String>,
}

/// Decode the `returnUrl` parameter of a login-flow query string.
pub fn parse_return_url(query: Option<&str>) -> String {
    query
        .and_then(|query| serde_urlencoded::from_str::<ReturnUrlQuery>(query).ok())
        .and_then(|query| query.return_url)
        .unwrap_or_default()
}

/// Whether `target` is a path on this origin, safe to redirect to.
///
/// Only visible ASCII is accepted so the target is always a valid `Location` value.
pub fn is_local_url(target: &str) -> bool {
    let Some(rest) = target.strip_prefix('/') else {
        return false;
    };

    !rest.starts_with('/')
        && !rest.starts_with('\\')
        && rest.bytes().all(|b| b.is_ascii_graphic())
}
