use crate::gate::metadata::{Attribute, TrustedIdentityMetadata};
use serde::Serialize;

/// Identity materialized for a single request.
///
/// Built fresh on every request, either from the metadata injected by the SSO agent or,
/// on a session-cache hit, from the principal name bound to the session. Never mutated
/// after construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub principal_name: String,
    pub given_name: String,
    pub surname: String,
    pub display_name: String,
    pub mail: String,
    pub affiliation: String,
    pub scoped_affiliation: String,
    pub roles: Vec<String>,
}

/// One entry of the fixed attribute listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttributeEntry {
    pub name: &'static str,
    pub value: String,
}

impl Principal {
    /// Returns `None` when the principal-name attribute is absent or empty.
    pub fn from_metadata(metadata: &TrustedIdentityMetadata) -> Option<Self> {
        let principal_name = metadata.get(Attribute::PrincipalName)?;
        if principal_name.is_empty() {
            return None;
        }

        let value = |attribute| metadata.get(attribute).unwrap_or_default().to_string();
        let affiliation = value(Attribute::Affiliation);

        Some(Self {
            principal_name: principal_name.to_string(),
            given_name: value(Attribute::GivenName),
            surname: value(Attribute::Surname),
            display_name: value(Attribute::DisplayName),
            mail: value(Attribute::Mail),
            roles: split_roles(&affiliation),
            affiliation,
            scoped_affiliation: value(Attribute::ScopedAffiliation),
        })
    }

    /// Principal rebuilt from a session-bound name; every other attribute is empty.
    pub fn from_session(principal_name: &str) -> Option<Self> {
        if principal_name.is_empty() {
            return None;
        }

        Some(Self {
            principal_name: principal_name.to_string(),
            ..Self::default()
        })
    }

    /// Name to greet the user with: the title-cased given name, else the principal name.
    pub fn display_identity(&self) -> String {
        if self.given_name.is_empty() {
            self.principal_name.clone()
        } else {
            title_case(&self.given_name)
        }
    }

    pub fn attributes(&self) -> Vec<AttributeEntry> {
        Attribute::ALL
            .iter()
            .map(|&attribute| AttributeEntry {
                name: attribute.listing_name(),
                value: self.value(attribute).to_string(),
            })
            .collect()
    }

    fn value(&self, attribute: Attribute) -> &str {
        match attribute {
            Attribute::PrincipalName => &self.principal_name,
            Attribute::GivenName => &self.given_name,
            Attribute::Surname => &self.surname,
            Attribute::DisplayName => &self.display_name,
            Attribute::Mail => &self.mail,
            Attribute::Affiliation => &self.affiliation,
            Attribute::ScopedAffiliation => &self.scoped_affiliation,
        }
    }
}

fn split_roles(affiliation: &str) -> Vec<String> {
    affiliation
        .split(';')
        .filter(|role| !role.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn title_case(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut word_start = true;

    for c in value.chars() {
        if word_start {
            result.extend(c.to_uppercase());
        } else {
            result.extend(c.to_lowercase());
        }
        word_start = c.is_whitespace() || c == '-';
    }

    result
}
