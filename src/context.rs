//! Per-request context passed to every use-case call.
//!
//! Carries tenant identity and the client-supplied idempotency key. Nothing
//! else in the crate reads tenant or idempotency state from anywhere else.

use uuid::Uuid;

/// Request-scoped values supplied by the transport.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation ID for log lines (UUIDv7).
    pub request_id: Uuid,
    tenant_id: Option<String>,
    idempotency_key: Option<String>,
}

impl RequestContext {
    /// Context for single-tenant mode with no idempotency key.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            tenant_id: None,
            idempotency_key: None,
        }
    }

    /// Set the tenant. Blank values leave the context in single-tenant mode.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = non_blank(tenant_id.into());
        self
    }

    /// Set the client-supplied idempotency key (e.g. from an `Idempotency-Key` header).
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = non_blank(key.into());
        self
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
