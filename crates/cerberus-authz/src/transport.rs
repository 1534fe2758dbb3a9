//! Transport to the remote authorizer.
//!
//! The engine and pool never construct HTTP clients directly; they go
//! through a [`TransportFactory`] injected at construction time. The
//! factory's security mode is an explicit variant - a plaintext transport
//! for local development and a TLS transport for production - so test
//! setups swap factories instead of mutating shared client state.

use std::collections::HashMap;
use std::sync::Arc;

use cerberus_core::{BoxFuture, Identity, ResourceContext};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::{AuthzError, AuthzResult};

/// Transport security mode for authorizer connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Plaintext HTTP; local development and tests only.
    Plaintext,
    /// TLS. `accept_invalid_certs` disables verification for self-signed
    /// development authorizers.
    Tls {
        /// Accept certificates that fail verification.
        accept_invalid_certs: bool,
    },
}

impl Default for TransportSecurity {
    fn default() -> Self {
        Self::Tls {
            accept_invalid_certs: false,
        }
    }
}

/// Connection settings for the remote authorizer.
#[derive(Debug, Clone)]
pub struct AuthorizerOptions {
    /// Base URL of the authorizer, e.g. `https://localhost:8383`.
    pub url: String,
    /// Tenant id sent with every request, if the authorizer is multi-tenant.
    pub tenant_id: Option<String>,
    /// API key for the authorizer.
    pub api_key: Option<String>,
    /// Per-call timeout enforced by the transport.
    pub timeout: Duration,
    /// Transport security mode.
    pub security: TransportSecurity,
}

impl AuthorizerOptions {
    /// Creates options for the given authorizer URL with default timeout and
    /// TLS security.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tenant_id: None,
            api_key: None,
            timeout: Duration::from_secs(5),
            security: TransportSecurity::default(),
        }
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the transport security mode.
    #[must_use]
    pub fn with_security(mut self, security: TransportSecurity) -> Self {
        self.security = security;
        self
    }
}

/// A single decision request to the authorizer.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    /// Caller identity.
    pub identity: Identity,
    /// Policy path to evaluate.
    pub policy_path: String,
    /// Decision names to evaluate (e.g. `["allowed"]`).
    pub decisions: Vec<String>,
    /// Policy instance name.
    pub policy_instance_name: String,
    /// Policy instance label.
    pub policy_instance_label: String,
    /// Resource context for the evaluation.
    pub resource_context: ResourceContext,
}

/// A client capable of asking the authorizer for decisions.
///
/// Implementations must be cancelable on timeout at the transport level;
/// the engine never cancels an in-flight call itself.
pub trait DecisionClient: Send + Sync {
    /// Evaluates the requested decisions and returns a map from decision
    /// name to boolean result.
    fn decide<'a>(
        &'a self,
        request: DecisionRequest,
    ) -> BoxFuture<'a, AuthzResult<HashMap<String, bool>>>;
}

/// Creates authorizer clients for the pool and the engine.
pub trait TransportFactory: Send + Sync {
    /// Builds a new client connection.
    fn connect(&self) -> AuthzResult<Arc<dyn DecisionClient>>;
}

// Wire types for the authorizer's REST `is` endpoint.

#[derive(Debug, Serialize)]
struct WireIdentityContext {
    #[serde(rename = "type")]
    identity_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<String>,
}

#[derive(Debug, Serialize)]
struct WirePolicyContext {
    path: String,
    decisions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct WirePolicyInstance {
    name: String,
    instance_label: String,
}

#[derive(Debug, Serialize)]
struct WireIsRequest {
    identity_context: WireIdentityContext,
    policy_context: WirePolicyContext,
    policy_instance: WirePolicyInstance,
    resource_context: ResourceContext,
}

#[derive(Debug, Deserialize)]
struct WireDecision {
    decision: String,
    #[serde(rename = "is")]
    is_allowed: bool,
}

#[derive(Debug, Deserialize)]
struct WireIsResponse {
    #[serde(default)]
    decisions: Vec<WireDecision>,
}

fn wire_identity(identity: &Identity) -> WireIdentityContext {
    match identity {
        Identity::None => WireIdentityContext {
            identity_type: "IDENTITY_TYPE_NONE",
            identity: None,
        },
        Identity::Manual(value) => WireIdentityContext {
            identity_type: "IDENTITY_TYPE_MANUAL",
            identity: Some(value.clone()),
        },
        Identity::Subject(value) => WireIdentityContext {
            identity_type: "IDENTITY_TYPE_SUB",
            identity: Some(value.clone()),
        },
    }
}

/// HTTP client for the authorizer's decision endpoint.
#[derive(Debug)]
pub struct HttpAuthorizerClient {
    client: reqwest::Client,
    options: AuthorizerOptions,
}

impl HttpAuthorizerClient {
    /// Builds a client from the given options.
    pub fn new(options: AuthorizerOptions) -> AuthzResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(options.timeout);

        if let TransportSecurity::Tls {
            accept_invalid_certs: true,
        } = options.security
        {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| AuthzError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, options })
    }

    fn is_url(&self) -> String {
        format!(
            "{}/api/v2/authz/is",
            self.options.url.trim_end_matches('/')
        )
    }
}

impl DecisionClient for HttpAuthorizerClient {
    fn decide<'a>(
        &'a self,
        request: DecisionRequest,
    ) -> BoxFuture<'a, AuthzResult<HashMap<String, bool>>> {
        Box::pin(async move {
            let body = WireIsRequest {
                identity_context: wire_identity(&request.identity),
                policy_context: WirePolicyContext {
                    path: request.policy_path,
                    decisions: request.decisions,
                },
                policy_instance: WirePolicyInstance {
                    name: request.policy_instance_name,
                    instance_label: request.policy_instance_label,
                },
                resource_context: request.resource_context,
            };

            let mut http_request = self.client.post(self.is_url()).json(&body);
            if let Some(api_key) = &self.options.api_key {
                http_request = http_request.header("authorization", format!("basic {api_key}"));
            }
            if let Some(tenant_id) = &self.options.tenant_id {
                http_request = http_request.header("x-tenant-id", tenant_id);
            }

            let response = http_request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(AuthzError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: WireIsResponse = response.json().await?;
            Ok(parsed
                .decisions
                .into_iter()
                .map(|d| (d.decision, d.is_allowed))
                .collect())
        })
    }
}

/// Factory producing [`HttpAuthorizerClient`] connections.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    options: AuthorizerOptions,
}

impl HttpTransportFactory {
    /// Creates a factory for the given options.
    #[must_use]
    pub fn new(options: AuthorizerOptions) -> Self {
        Self { options }
    }

    /// Returns the options this factory connects with.
    #[must_use]
    pub fn options(&self) -> &AuthorizerOptions {
        &self.options
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self) -> AuthzResult<Arc<dyn DecisionClient>> {
        Ok(Arc::new(HttpAuthorizerClient::new(self.options.clone())?))
    }
}
