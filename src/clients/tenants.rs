use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::{read_envelope, ClientError, ServiceTokens};
use crate::tenants::TenantStatus;

const SERVICE: &str = "tenants-registry";

/// Tenant metadata as the Tenants registry publishes it.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub site_id: String,
    pub site_admin_tenant_id: String,
    /// Base URL of the token service for this tenant; becomes `iss`.
    pub token_service: String,
    pub public_key: Option<String>,
    pub status: TenantStatus,
    #[serde(default)]
    pub access_token_ttl: Option<u64>,
    #[serde(default)]
    pub refresh_token_ttl: Option<u64>,
}

/// Client for the Tenants registry. Reads are public; `update_tenant`
/// requires the service token of the target tenant's site.
#[derive(Clone)]
pub struct TenantsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<ServiceTokens>,
    service_tenant_id: String,
    service_name: String,
}

impl TenantsClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<ServiceTokens>,
        service_tenant_id: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            service_tenant_id: service_tenant_id.into(),
            service_name: service_name.into(),
        }
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantRecord>, ClientError> {
        let url = format!("{}/v3/tenants", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        read_envelope(SERVICE, response).await
    }

    /// Fetch one tenant; DRAFT and INACTIVE tenants are returned too, since
    /// key rotation must work on tenants that are not live yet.
    pub async fn get_tenant(&self, tenant_id: &str) -> Result<TenantRecord, ClientError> {
        let url = format!("{}/v3/tenants/{}", self.base_url, tenant_id);
        let response = self
            .http
            .get(&url)
            .query(&[("show_draft", "true")])
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        read_envelope(SERVICE, response).await
    }

    pub async fn update_tenant(
        &self,
        tenant_id: &str,
        public_key: &str,
    ) -> Result<(), ClientError> {
        let url = format!("{}/v3/tenants/{}", self.base_url, tenant_id);
        let response = self
            .http
            .put(&url)
            .header("X-Tapis-Token", self.tokens.for_tenant(tenant_id))
            .header("X-Tapis-Tenant", &self.service_tenant_id)
            .header("X-Tapis-User", &self.service_name)
            .json(&json!({ "public_key": public_key }))
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        let _: serde_json::Value = read_envelope(SERVICE, response).await?;
        Ok(())
    }
}
