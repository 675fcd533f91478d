use serde_json::json;

use crate::error::ApiError;
use crate::services::AppState;
use crate::tenants::TenantError;

/// Sentinel secret value that tells the SK to generate the key pair
/// server-side; no key material travels in the write.
const GENERATE_SECRET: &str = "<generate-secret>";

/// Rotate a tenant's signing key pair. Three phases against two external
/// stores, with no two-phase commit:
///
/// 1. generate the pair inside the SK,
/// 2. read it back,
/// 3. publish the public key to the Tenants registry,
///
/// then swap the private key into the cache. If phase 3 fails after phase 1
/// succeeded, the SK and the registry disagree; that state is surfaced as an
/// `inconsistency` error and never papered over with a retry — the SK is the
/// source of truth and operators reconcile by re-publishing.
///
/// Returns the new public key.
pub async fn rotate_signing_keys(state: &AppState, tenant_id: &str) -> Result<String, ApiError> {
    let user = &state.config.service.service_name;

    state
        .sk
        .write_secret(
            "jwtsigning",
            "keys",
            tenant_id,
            user,
            json!({ "privateKey": GENERATE_SECRET }),
        )
        .await?;
    tracing::debug!("SK generated a new key pair for tenant {}", tenant_id);

    let secret = state
        .sk
        .read_secret("jwtsigning", "keys", tenant_id, user)
        .await?;
    let (private_key, public_key) = match (secret.private_key, secret.public_key) {
        (Some(private_key), Some(public_key)) => (private_key, public_key),
        _ => {
            tracing::error!(
                "SK returned an incomplete key pair for tenant {} after generation",
                tenant_id
            );
            return Err(ApiError::internal(
                "Unable to rotate signing keys. Please contact system administrators.",
            ));
        }
    };

    if let Err(e) = state.registry.update_tenant(tenant_id, &public_key).await {
        tracing::error!(
            "Got exception trying to update tenant {} with the new public key. \
             SK and Tenants are now out of sync; inspect immediately. error: {}",
            tenant_id,
            e
        );
        return Err(ApiError::inconsistency(
            "Unable to update the tenant definition with the new public key. \
             Please contact system administrators.",
        ));
    }
    tracing::info!("tenant {} has been updated with the new public key", tenant_id);

    match state.cache.set_private_key(tenant_id, &private_key) {
        Ok(()) => {}
        // DRAFT tenants can be re-keyed before this instance serves them;
        // nothing to swap in that case.
        Err(TenantError::NotFound(_)) => {
            tracing::debug!("tenant {} not in the local cache; no key swap needed", tenant_id);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(public_key)
}
