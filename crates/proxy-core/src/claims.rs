//! Claim normalization.
//!
//! Providers disagree on the shape of identity claims: `groups` may be a
//! list of strings, a list of mixed values, a single string, or missing
//! entirely. Everything here resolves those shapes into the fixed
//! [`Identity`] shape without failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded claims of an ID token (and merged `UserInfo` data).
pub type Claims = Map<String, Value>;

/// Shape of a single claim value.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimValue {
    /// Claim not present, or explicitly `null`.
    Absent,
    /// Any non-list value: string, number, bool or object.
    Scalar(Value),
    /// A list whose elements are all strings.
    StringList(Vec<String>),
    /// A list with at least one non-string element.
    MixedList(Vec<Value>),
}

impl From<Option<&Value>> for ClaimValue {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::Array(items)) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                match strings {
                    Some(list) => Self::StringList(list),
                    None => Self::MixedList(items.clone()),
                }
            }
            Some(other) => Self::Scalar(other.clone()),
        }
    }
}

impl ClaimValue {
    /// Resolve the value into a group list.
    ///
    /// String lists are returned verbatim, mixed lists are stringified
    /// element by element (order preserved), anything else is empty.
    #[must_use]
    pub fn into_groups(self) -> Vec<String> {
        match self {
            Self::StringList(list) => list,
            Self::MixedList(items) => items.iter().map(display_value).collect(),
            Self::Absent | Self::Scalar(_) => Vec::new(),
        }
    }
}

/// String form of a claim element. Strings are unquoted.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a groups claim of any shape into an ordered list of strings.
#[must_use]
pub fn normalize_groups(value: Option<&Value>) -> Vec<String> {
    ClaimValue::from(value).into_groups()
}

/// True for characters kept verbatim in a claim header key.
///
/// This is the RFC 7230 `tchar` set without `!`.
fn is_header_safe(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '_' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '`' | '|' | '~'
        )
}

/// Replace every character that is not valid in a header token with `-`.
///
/// ```
/// assert_eq!(oidc_proxy_core::safe_header("weird key!"), "weird-key-");
/// assert_eq!(oidc_proxy_core::safe_header("a b(c)"), "a-b-c-");
/// ```
#[must_use]
pub fn safe_header(key: &str) -> String {
    key.chars()
        .map(|c| if is_header_safe(c) { c } else { '-' })
        .collect()
}

/// Merge `extra` into `into`, sanitizing each incoming key.
///
/// Existing entries with the same (sanitized) key are overwritten.
pub fn merge_claims(into: &mut Claims, extra: Claims) {
    for (key, value) in extra {
        into.insert(safe_header(&key), value);
    }
}

/// Claim names used to build an [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimNames {
    /// Claim holding the email address.
    pub email: String,
    /// Claim holding the group list.
    pub groups: String,
    /// Claim holding the preferred username.
    pub username: String,
}

impl Default for ClaimNames {
    fn default() -> Self {
        Self {
            email: "email".to_string(),
            groups: "groups".to_string(),
            username: "preferred_username".to_string(),
        }
    }
}

/// Canonical identity forwarded to upstream services.
///
/// An empty `subject` means the request is anonymous; in that case every
/// other field is empty as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier (`sub`).
    pub subject: String,
    /// Token issuer (`iss`).
    pub issuer: String,
    /// Email address, empty when the claim is missing or not a string.
    pub email: String,
    /// Preferred username, empty when the claim is missing or not a string.
    pub username: String,
    /// Group memberships in claim order.
    pub groups: Vec<String>,
}

impl Identity {
    /// The anonymous identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build an identity from verified token fields and its claims.
    #[must_use]
    pub fn from_claims(subject: &str, issuer: &str, claims: &Claims, names: &ClaimNames) -> Self {
        if subject.is_empty() {
            return Self::anonymous();
        }
        let string_claim = |name: &str| {
            claims
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            email: string_claim(&names.email),
            username: string_claim(&names.username),
            groups: normalize_groups(claims.get(&names.groups)),
        }
    }

    /// Whether a verified subject is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.subject.is_empty()
    }
}
