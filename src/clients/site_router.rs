use std::sync::Arc;

use serde_json::json;

use super::{read_envelope, ClientError, ServiceTokens};

const SERVICE: &str = "site-router";

/// Client for the site-local revocation registry, reached through the same
/// base URL as the Tenants registry.
#[derive(Clone)]
pub struct SiteRouterClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<ServiceTokens>,
    service_tenant_id: String,
    service_name: String,
}

impl SiteRouterClient {
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

    /// Ask the site-router to mark the token's jti revoked. Any non-2xx
    /// response is an upstream failure; the revocation list itself lives
    /// with the site-router, not here.
    pub async fn revoke_token(&self, raw_token: &str) -> Result<(), ClientError> {
        let url = format!("{}/v3/site-router/tokens/revoke", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-Tapis-Token", self.tokens.default_token())
            .header("X-Tapis-Tenant", &self.service_tenant_id)
            .header("X-Tapis-User", &self.service_name)
            .json(&json!({ "token": raw_token }))
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
