//! Trusted identity metadata injected by the SSO agent.
//!
//! The SSO agent runs as the proxy hop in front of the gate and places the asserted
//! identity in request headers. Those headers are only honoured when the immediate peer
//! is a configured trusted proxy: a client reaching the gate directly could otherwise
//! forge them. The gate performs no cryptographic verification of its own.

use crate::configuration::{AttributeHeaders, SsoConfig};
use hyper::header::HeaderName;
use hyper::http::request::Parts;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    PrincipalName,
    GivenName,
    Surname,
    DisplayName,
    Mail,
    Affiliation,
    ScopedAffiliation,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::PrincipalName,
        Attribute::GivenName,
        Attribute::Surname,
        Attribute::DisplayName,
        Attribute::Mail,
        Attribute::Affiliation,
        Attribute::ScopedAffiliation,
    ];

    pub fn listing_name(self) -> &'static str {
        match self {
            Attribute::PrincipalName => "eduPersonPrincipalName",
            Attribute::GivenName => "givenName",
            Attribute::Surname => "surname",
            Attribute::DisplayName => "displayName",
            Attribute::Mail => "mail",
            Attribute::Affiliation => "eduPersonAffiliation",
            Attribute::ScopedAffiliation => "eduPersonScopedAffiliation",
        }
    }
}

/// Per-request snapshot of the attributes the SSO agent asserted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustedIdentityMetadata {
    attributes: HashMap<Attribute, String>,
}

impl TrustedIdentityMetadata {
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.attributes.get(&attribute).map(String::as_str)
    }

    pub fn insert(&mut self, attribute: Attribute, value: String) {
        self.attributes.insert(attribute, value);
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Reads trusted identity metadata from request headers.
#[derive(Clone, Debug)]
pub struct IdentityExtractor {
    headers: Vec<(Attribute, HeaderName)>,
    trusted_proxies: Vec<IpAddr>,
    trust_any_peer: bool,
}

impl IdentityExtractor {
    pub fn new(config: &SsoConfig) -> Self {
        Self {
            headers: header_mapping(&config.attributes),
            trusted_proxies: config.trusted_proxies.clone(),
            trust_any_peer: config.trust_any_peer,
        }
    }

    fn is_trusted_peer(&self, peer: Option<SocketAddr>) -> bool {
        if self.trust_any_peer {
            return true;
        }

        let Some(peer) = peer else {
            return false;
        };

        let ip = match peer.ip() {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
            ip @ IpAddr::V4(_) => ip,
        };
        self.trusted_proxies.contains(&ip)
    }

    /// Metadata carried by the request, or empty metadata when the peer is not trusted.
    pub fn metadata(&self, parts: &Parts, peer: Option<SocketAddr>) -> TrustedIdentityMetadata {
        let mut metadata = TrustedIdentityMetadata::default();

        for (attribute, header) in &self.headers {
            let Some(value) = parts.headers.get(header) else {
                continue;
            };

            match std::str::from_utf8(value.as_bytes()) {
                Ok(value) => metadata.insert(*attribute, value.trim().to_string()),
                Err(_) => debug!("Ignoring identity header {header}: value is not valid UTF-8"),
            }
        }

        if metadata.is_empty() || self.is_trusted_peer(peer) {
            return metadata;
        }

        warn!(
            peer = ?peer,
            "Identity headers received from an untrusted peer, ignoring them"
        );
        TrustedIdentityMetadata::default()
    }
}

fn header_mapping(headers: &AttributeHeaders) -> Vec<(Attribute, HeaderName)> {
    Attribute::ALL
        .iter()
        .zip(headers.names())
        .filter_map(|(attribute, name)| {
            // Names are validated when the configuration is loaded; an empty name disables
            // the attribute.
            HeaderName::from_bytes(name.as_bytes())
                .ok()
                .map(|header| (*attribute, header))
        })
        .collect()
}
