pub mod bootstrap;
pub mod rotation;

use std::sync::Arc;

use crate::clients::site_router::SiteRouterClient;
use crate::clients::sk::SkClient;
use crate::clients::tenants::TenantsClient;
use crate::clients::{ClientError, ServiceTokens};
use crate::config::AppConfig;
use crate::tenants::{TenantCache, TtlDefaults};

/// Everything a request handler needs, built once by bootstrap and threaded
/// through axum state. Replaces the module-level singletons of a typical
/// Flask-era service with an explicit context.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<TenantCache>,
    pub sk: SkClient,
    pub registry: TenantsClient,
    pub site_router: SiteRouterClient,
    pub service_tokens: Arc<ServiceTokens>,
}

impl AppState {
    pub fn ttl_defaults(&self) -> TtlDefaults {
        TtlDefaults {
            access_token_ttl: self.config.dev.default_access_token_ttl,
            refresh_token_ttl: self.config.dev.default_refresh_token_ttl,
        }
    }

    /// Refetch tenant metadata from the registry. Cached private keys are
    /// preserved; the SK owns key material.
    pub async fn reload_tenants(&self) -> Result<(), ClientError> {
        let records = self.registry.list_tenants().await?;
        self.cache.reload(&records, self.ttl_defaults());
        Ok(())
    }
}
