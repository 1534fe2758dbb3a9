//! Caller identity for authorization checks.
//!
//! An [`Identity`] is produced once per request by the application's
//! [`IdentityProvider`](crate::IdentityProvider) and threaded through every
//! authorization check. It is immutable after construction.

use serde::{Deserialize, Serialize};

/// The kind of identity attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// No identity (anonymous / unauthenticated).
    None,
    /// A manually supplied opaque identifier.
    Manual,
    /// A subject identifier from an authenticated session.
    Subject,
}

/// The identity of the caller, as seen by the authorizer.
///
/// # Example
///
/// ```
/// use cerberus_core::Identity;
///
/// let identity = Identity::subject("user-123");
/// assert_eq!(identity.value(), Some("user-123"));
/// assert!(!identity.is_anonymous());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identity {
    /// No identity was established for the request.
    None,
    /// A manually supplied opaque identity string.
    Manual(String),
    /// A subject identifier from an authenticated session.
    Subject(String),
}

impl Identity {
    /// Creates a subject identity.
    pub fn subject(value: impl Into<String>) -> Self {
        Self::Subject(value.into())
    }

    /// Creates a manual identity from an opaque string.
    pub fn manual(value: impl Into<String>) -> Self {
        Self::Manual(value.into())
    }

    /// Creates an anonymous identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::None
    }

    /// Returns the kind of this identity.
    #[must_use]
    pub fn kind(&self) -> IdentityKind {
        match self {
            Self::None => IdentityKind::None,
            Self::Manual(_) => IdentityKind::Manual,
            Self::Subject(_) => IdentityKind::Subject,
        }
    }

    /// Returns the identity value, if one is present.
    ///
    /// Anonymous identities and identities with an empty value return `None`.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Manual(v) | Self::Subject(v) => {
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            }
        }
    }

    /// Returns true when no usable identity value is present.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.value().is_none()
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// This never returns sensitive credential material; the identity value
    /// itself is the only thing exposed.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::None => "anonymous".to_string(),
            Self::Manual(v) => format!("manual:{v}"),
            Self::Subject(v) => format!("subject:{v}"),
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.log_id())
    }
}
