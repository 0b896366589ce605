//! Tenant-scoped cache keys.

use crate::context::RequestContext;

/// Prefix applied to every cache key of a tenant.
const TENANT_KEY_PREFIX: &str = "tenant";

/// Derive the cache key for `base_key` under an optional tenant.
///
/// Without a tenant the key is returned unchanged (single-tenant mode).
pub fn scope_key(tenant_id: Option<&str>, base_key: &str) -> String {
    match tenant_id {
        Some(tenant) if !tenant.is_empty() => {
            format!("{}:{}:{}", TENANT_KEY_PREFIX, tenant, base_key)
        }
        _ => base_key.to_string(),
    }
}

/// Derive the cache key for `base_key` under the context's tenant.
pub fn scoped_key(ctx: &RequestContext, base_key: &str) -> String {
    scope_key(ctx.tenant_id(), base_key)
}
