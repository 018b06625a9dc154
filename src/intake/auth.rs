//! Tenant/API-key authentication (spec §6, "Requests carry headers
//! `X-API-Key` and `X-Tenant-Id`"), adapted from the teacher's
//! `middleware_auth::UserContext` `FromRequestParts` extractor: there the
//! subject comes out of a decoded JWT, here it comes from a hashed API key
//! looked up against the tenant-scoped store.

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::intake::AppState;

/// Authenticated caller identity, attached to every non-public route.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub api_key_label: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let tenant_id = header_value(parts, "X-Tenant-Id")?;
        let api_key = header_value(parts, "X-API-Key")?;
        let key_hash = hash_api_key(&api_key);

        let key = app_state
            .api_keys
            .authenticate(&tenant_id, &key_hash)
            .await?
            .ok_or_else(|| EngineError::Auth {
                message: "invalid or revoked API key".to_string(),
            })?;

        Ok(TenantContext {
            tenant_id,
            api_key_label: key.label,
        })
    }
}

fn header_value(parts: &Parts, name: &str) -> Result<String, EngineError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EngineError::Auth {
        message: format!("missing or empty {name} header"),
    })
}

pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_key_sensitive() {
        assert_eq!(hash_api_key("secret"), hash_api_key("secret"));
        assert_ne!(hash_api_key("secret"), hash_api_key("other"));
    }
}
