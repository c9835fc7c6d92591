use hyper::{Method, Uri};

pub const HOME: &str = "/";
pub const IDENTITY: &str = "/shibboleth";
pub const ATTRIBUTES: &str = "/shibboleth/attributes";
pub const ANTIFORGERY: &str = "/account/antiforgery";
pub const LOGOUT: &str = "/account/logout";
pub const HEALTHZ: &str = "/healthz";
pub const METRICS: &str = "/metrics";

/// Paths served by the gate itself; the configured login path may not reuse them.
pub const RESERVED_PATHS: &[&str] = &[
    HOME,
    IDENTITY,
    ATTRIBUTES,
    ANTIFORGERY,
    LOGOUT,
    HEALTHZ,
    METRICS,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Identity,
    Attributes,
    AntiForgeryToken,
    Logout,
    Healthz,
    Metrics,
    MethodNotAllowed,
    Unknown,
}

impl Route {
    /// Whether the authentication gate must pass before the route's handler runs.
    pub fn is_protected(self) -> bool {
        matches!(
            self,
            Route::Identity | Route::Attributes | Route::AntiForgeryToken | Route::Logout
        )
    }
}

pub fn parse(method: &Method, uri: &Uri, login_path: &str) -> Route {
    let path = uri.path();

    let (route, allowed) = match path {
        HOME => (Route::Home, Method::GET),
        IDENTITY => (Route::Identity, Method::GET),
        ATTRIBUTES => (Route::Attributes, Method::GET),
        ANTIFORGERY => (Route::AntiForgeryToken, Method::GET),
        LOGOUT => (Route::Logout, Method::POST),
        HEALTHZ => (Route::Healthz, Method::GET),
        METRICS => (Route::Metrics, Method::GET),
        _ if path == login_path => (Route::Login, Method::GET),
        _ => return Route::Unknown,
    };

    if *method == allowed {
        route
    } else {
        Route::MethodNotAllowed
    }
}
