use hyper::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

mod error;
pub mod watcher;

use crate::gate::return_url::is_local_url;
use crate::gate::server::route::RESERVED_PATHS;
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub sso: SsoConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            max_concurrent_requests: GlobalConfig::default_max_concurrent_requests(),
        }
    }
}

impl GlobalConfig {
    fn default_max_concurrent_requests() -> usize {
        4
    }
}

/// Whether a session that already carries a principal name is enough to pass the gate
/// when the SSO agent did not inject identity metadata on the current request.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionFallback {
    #[default]
    Allow,
    Deny,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SsoConfig {
    #[serde(default)]
    pub login_path: String,
    #[serde(default)]
    pub logout_path: String,
    #[serde(default = "SsoConfig::default_application_root")]
    pub application_root: String,
    #[serde(default)]
    pub session_fallback: SessionFallback,
    #[serde(default = "SsoConfig::default_trusted_proxies")]
    pub trusted_proxies: Vec<IpAddr>,
    #[serde(default)]
    pub trust_any_peer: bool,
    #[serde(default)]
    pub attributes: AttributeHeaders,
}

impl SsoConfig {
    fn default_application_root() -> String {
        "/".to_string()
    }

    fn default_trusted_proxies() -> Vec<IpAddr> {
        vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ]
    }
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            login_path: String::new(),
            logout_path: String::new(),
            application_root: Self::default_application_root(),
            session_fallback: SessionFallback::default(),
            trusted_proxies: Self::default_trusted_proxies(),
            trust_any_peer: false,
            attributes: AttributeHeaders::default(),
        }
    }
}

/// Names of the request headers the SSO agent fills with each identity attribute.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AttributeHeaders {
    pub principal_name: String,
    pub given_name: String,
    pub surname: String,
    pub display_name: String,
    pub mail: String,
    pub affiliation: String,
    pub scoped_affiliation: String,
}

impl Default for AttributeHeaders {
    fn default() -> Self {
        Self {
            principal_name: "eppn".to_string(),
            given_name: "givenname".to_string(),
            surname: "sn".to_string(),
            display_name: "displayname".to_string(),
            mail: "mail".to_string(),
            affiliation: "unscopedaffiliation".to_string(),
            scoped_affiliation: "affiliation".to_string(),
        }
    }
}

impl AttributeHeaders {
    /// Header names in attribute-listing order, principal name first.
    pub fn names(&self) -> [&str; 7] {
        [
            &self.principal_name,
            &self.given_name,
            &self.surname,
            &self.display_name,
            &self.mail,
            &self.affiliation,
            &self.scoped_affiliation,
        ]
    }
}

/// Longest accepted session lifetime, one year.
pub const MAX_SESSION_TTL: u64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "SessionConfig::default_ttl")]
    pub ttl: u64,
    #[serde(default = "SessionConfig::default_secure_cookie")]
    pub secure_cookie: bool,
}

impl SessionConfig {
    fn default_cookie_name() -> String {
        "shibgate_session".to_string()
    }

    fn default_ttl() -> u64 {
        1200
    }

    fn default_secure_cookie() -> bool {
        true
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: Self::default_cookie_name(),
            ttl: Self::default_ttl(),
            secure_cookie: Self::default_secure_cookie(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SessionStoreConfig {
    pub redis: Option<RedisSessionStoreConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RedisSessionStoreConfig {
    pub url: String,
    #[serde(default = "RedisSessionStoreConfig::default_key_prefix")]
    pub key_prefix: String,
}

impl RedisSessionStoreConfig {
    fn default_key_prefix() -> String {
        "shibgate:".to_string()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice).map_err(|e| {
            println!("Configuration file format error:");
            println!("{e}");
            Error::ConfigurationFileFormat(e.to_string())
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        let sso = &self.sso;

        if sso.login_path.is_empty() {
            return Err(Error::MisconfiguredEndpoint(
                "sso.login_path is not configured".to_string(),
            ));
        }
        if !is_local_url(&sso.login_path)
            || sso.login_path.contains('?')
            || HeaderValue::from_str(&sso.login_path).is_err()
        {
            return Err(Error::MisconfiguredEndpoint(format!(
                "sso.login_path must be a local path without query: {}",
                sso.login_path
            )));
        }
        if RESERVED_PATHS.contains(&sso.login_path.as_str()) {
            return Err(Error::MisconfiguredEndpoint(format!(
                "sso.login_path collides with a built-in route: {}",
                sso.login_path
            )));
        }
        if sso.logout_path.trim().is_empty() {
            return Err(Error::MisconfiguredEndpoint(
                "sso.logout_path is not configured".to_string(),
            ));
        }
        if HeaderValue::from_str(&sso.logout_path).is_err() {
            return Err(Error::MisconfiguredEndpoint(format!(
                "sso.logout_path is not a valid redirect location: {}",
                sso.logout_path
            )));
        }
        if !is_local_url(&sso.application_root) {
            return Err(Error::MisconfiguredEndpoint(format!(
                "sso.application_root must be a local path: {}",
                sso.application_root
            )));
        }

        let principal_header = &sso.attributes.principal_name;
        if principal_header.is_empty() {
            return Err(Error::MisconfiguredEndpoint(
                "sso.attributes.principal_name is not configured".to_string(),
            ));
        }
        for name in sso.attributes.names() {
            if !name.is_empty() && HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(Error::MisconfiguredEndpoint(format!(
                    "invalid attribute header name: {name}"
                )));
            }
        }

        if self.session.cookie_name.is_empty() {
            return Err(Error::MisconfiguredEndpoint(
                "session.cookie_name is not configured".to_string(),
            ));
        }
        if self.session.ttl == 0 {
            return Err(Error::MisconfiguredEndpoint(
                "session.ttl must be greater than zero".to_string(),
            ));
        }
        if self.session.ttl > MAX_SESSION_TTL {
            return Err(Error::MisconfiguredEndpoint(format!(
                "session.ttl must not exceed {MAX_SESSION_TTL} seconds"
            )));
        }

        Ok(())
    }

    /// Settings that are accepted but weaken the gate.
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.sso.trust_any_peer {
            warnings.push(
                "sso.trust_any_peer is enabled: identity headers are trusted from every peer",
            );
        }
        warnings
    }
}
