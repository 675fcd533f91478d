pub mod site_router;
pub mod sk;
pub mod tenants;

use std::collections::HashMap;

use serde::Deserialize;

/// Error from an outbound call to the SK, the Tenants registry, or the
/// site-router. All of these surface to clients as `upstream_unavailable`;
/// the detail stays in the log.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("unexpected response shape from {service}: {detail}")]
    Envelope {
        service: &'static str,
        detail: String,
    },
}

/// Standard response envelope used by the Tapis services we call.
#[derive(Debug, Deserialize)]
pub struct TapisEnvelope<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The service tokens minted at bootstrap, one per site-admin tenant,
/// pre-resolved so each outbound call can pick the token for its target
/// tenant without consulting the cache. Read-only after bootstrap.
#[derive(Debug, Clone)]
pub struct ServiceTokens {
    by_tenant: HashMap<String, String>,
    default_token: String,
}

impl ServiceTokens {
    pub fn new(by_tenant: HashMap<String, String>, default_token: String) -> Self {
        Self {
            by_tenant,
            default_token,
        }
    }

    /// Token to present when addressing `tenant_id`; falls back to the
    /// service's own site-admin token for tenants minted after bootstrap.
    pub fn for_tenant(&self, tenant_id: &str) -> &str {
        self.by_tenant
            .get(tenant_id)
            .map(String::as_str)
            .unwrap_or(&self.default_token)
    }

    pub fn default_token(&self) -> &str {
        &self.default_token
    }
}

pub(crate) async fn read_envelope<T: serde::de::DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            service,
            status: status.as_u16(),
            message,
        });
    }
    let envelope: TapisEnvelope<T> = response.json().await.map_err(|source| ClientError::Http {
        url: format!("<{service} response body>"),
        source,
    })?;
    envelope.result.ok_or(ClientError::Envelope {
        service,
        detail: "missing result".to_string(),
    })
}
