//! Header-based identity provider.
//!
//! A convenience [`IdentityProvider`] for deployments where an upstream
//! gateway has already authenticated the caller and attached the subject
//! in a trusted header. Applications with their own session machinery
//! supply their own provider instead.

use cerberus_core::{AuthRequest, Identity, IdentityProvider};

/// Default header carrying an authenticated subject id.
pub const SUBJECT_HEADER: &str = "x-user-id";

/// Default header carrying an opaque manual identity.
pub const MANUAL_HEADER: &str = "x-identity";

/// Extracts identity from trusted request headers.
///
/// Precedence: subject header, then manual header, then anonymous.
///
/// # Example
///
/// ```
/// use cerberus_core::{AuthRequest, IdentityProvider};
/// use cerberus_middleware::identity::HeaderIdentityProvider;
///
/// let provider = HeaderIdentityProvider::new();
/// let request = http::Request::builder()
///     .uri("/documents")
///     .header("x-user-id", "alice")
///     .body(())
///     .unwrap();
/// let (parts, ()) = request.into_parts();
/// let identity = provider.identity(&AuthRequest::new(parts));
/// assert_eq!(identity.value(), Some("alice"));
/// ```
#[derive(Debug, Clone)]
pub struct HeaderIdentityProvider {
    subject_header: String,
    manual_header: String,
}

impl HeaderIdentityProvider {
    /// Creates a provider reading the default headers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subject_header: SUBJECT_HEADER.to_string(),
            manual_header: MANUAL_HEADER.to_string(),
        }
    }

    /// Overrides the subject header name.
    #[must_use]
    pub fn with_subject_header(mut self, name: impl Into<String>) -> Self {
        self.subject_header = name.into();
        self
    }

    /// Overrides the manual header name.
    #[must_use]
    pub fn with_manual_header(mut self, name: impl Into<String>) -> Self {
        self.manual_header = name.into();
        self
    }
}

impl Default for HeaderIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for HeaderIdentityProvider {
    fn identity(&self, request: &AuthRequest) -> Identity {
        if let Some(subject) = request.header(&self.subject_header) {
            if !subject.is_empty() {
                return Identity::subject(subject);
            }
        }
        if let Some(value) = request.header(&self.manual_header) {
            if !value.is_empty() {
                return Identity::manual(value);
            }
        }
        Identity::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> AuthRequest {
        let mut builder = http::Request::builder().uri("/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        AuthRequest::new(parts)
    }

    #[test]
    fn test_anonymous_without_headers() {
        let provider = HeaderIdentityProvider::new();
        assert!(provider.identity(&request(&[])).is_anonymous());
    }

    #[test]
    fn test_subject_header() {
        let provider = HeaderIdentityProvider::new();
        let identity = provider.identity(&request(&[("x-user-id", "alice")]));
        assert_eq!(identity, Identity::subject("alice"));
    }

    #[test]
    fn test_manual_header() {
        let provider = HeaderIdentityProvider::new();
        let identity = provider.identity(&request(&[("x-identity", "svc-7")]));
        assert_eq!(identity, Identity::manual("svc-7"));
    }

    #[test]
    fn test_subject_takes_precedence() {
        let provider = HeaderIdentityProvider::new();
        let identity = provider.identity(&request(&[
            ("x-user-id", "alice"),
            ("x-identity", "svc-7"),
        ]));
        assert_eq!(identity, Identity::subject("alice"));
    }

    #[test]
    fn test_custom_header_names() {
        let provider = HeaderIdentityProvider::new().with_subject_header("x-session-user");
        let identity = provider.identity(&request(&[("x-session-user", "bob")]));
        assert_eq!(identity, Identity::subject("bob"));
    }

    #[test]
    fn test_empty_header_is_anonymous() {
        let provider = HeaderIdentityProvider::new();
        assert!(provider.identity(&request(&[("x-user-id", "")])).is_anonymous());
    }
}
