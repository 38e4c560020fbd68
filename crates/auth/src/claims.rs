use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use tessera_core::UserId;

/// Claims that carry the internal numeric user id.
pub const INTERNAL_ID_CLAIMS: &[&str] = &["uid", "extension_UserId"];

/// Claims that carry the federated directory object id.
pub const OBJECT_ID_CLAIMS: &[&str] = &[
    "oid",
    "http://schemas.microsoft.com/identity/claims/objectidentifier",
];

/// Username/email-like claims, in the order they are tried.
pub const USERNAME_CLAIMS: &[&str] = &[
    "preferred_username",
    "upn",
    "unique_name",
    "email",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
];

/// Provider prefixes stripped from username claims by default.
pub const DEFAULT_PROVIDER_PREFIXES: &[&str] = &["live.com#"];

/// Claims attached to the current principal (transport-agnostic).
///
/// Signature verification happens upstream; this is only the decoded
/// name -> value mapping plus whether the principal is authenticated at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalClaims {
    pub authenticated: bool,
    pub claims: HashMap<String, String>,
}

/// One resolvable identity hint, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityClaim {
    InternalId(UserId),
    ObjectId(String),
    Username(String),
}

impl IdentityClaim {
    /// Normalized key used for caching the resolved bundle.
    pub fn cache_key(&self) -> String {
        match self {
            Self::InternalId(id) => format!("uid:{id}"),
            Self::ObjectId(oid) => format!("oid:{}", oid.to_ascii_lowercase()),
            Self::Username(name) => format!("email:{}", name.to_ascii_lowercase()),
        }
    }
}

impl PrincipalClaims {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated<I, K, V>(claims: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            authenticated: true,
            claims: claims
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.claims
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Identity hints in resolution order: internal id, object id, usernames.
    ///
    /// Unauthenticated principals yield nothing. An internal id claim that is
    /// not numeric is skipped rather than treated as an error.
    pub fn identity_candidates(&self, provider_prefixes: &[String]) -> Vec<IdentityClaim> {
        if !self.authenticated {
            return Vec::new();
        }

        let mut out = Vec::new();

        for name in INTERNAL_ID_CLAIMS {
            if let Some(id) = self.get(name).and_then(|v| v.parse::<UserId>().ok()) {
                out.push(IdentityClaim::InternalId(id));
            }
        }

        for name in OBJECT_ID_CLAIMS {
            if let Some(oid) = self.get(name) {
                out.push(IdentityClaim::ObjectId(oid.to_string()));
            }
        }

        for name in USERNAME_CLAIMS {
            if let Some(value) = self.get(name) {
                let username = strip_provider_prefix(value, provider_prefixes);
                if !username.is_empty() {
                    out.push(IdentityClaim::Username(username.to_string()));
                }
            }
        }

        let mut seen = HashSet::new();
        out.retain(|c| seen.insert(c.cache_key()));
        out
    }
}

/// Strip the first matching provider prefix (case-insensitive).
pub fn strip_provider_prefix<'a>(value: &'a str, prefixes: &[String]) -> &'a str {
    for prefix in prefixes {
        if value.len() >= prefix.len()
            && value.is_char_boundary(prefix.len())
            && value[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return value[prefix.len()..].trim();
        }
    }
    value
}

pub fn default_provider_prefixes() -> Vec<String> {
    DEFAULT_PROVIDER_PREFIXES
        .iter()
        .map(|p| p.to_string())
        .collect()
}
