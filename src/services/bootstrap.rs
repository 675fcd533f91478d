use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::clients::site_router::SiteRouterClient;
use crate::clients::sk::SkClient;
use crate::clients::tenants::TenantsClient;
use crate::clients::ServiceTokens;
use crate::config::AppConfig;
use crate::services::AppState;
use crate::tenants::{Tenant, TenantCache, TtlDefaults};
use crate::tokens::{AccountType, NewTokenRequest, TapisAccessToken};

/// TTL of the self-issued service tokens: 10 years.
pub const SERVICE_TOKEN_TTL: u64 = 60 * 60 * 24 * 365 * 10;

/// Start-up sequence. Any failure here is fatal; the HTTP listener must not
/// start against a half-built cache.
///
/// The chicken-and-egg: talking to the SK requires a signed service token,
/// and signing requires a private key, which normally lives in the SK. The
/// loop is broken by the site-admin private key injected out-of-band through
/// config — it signs the initial service tokens, after which every other
/// tenant's key is fetched from the SK.
pub async fn init(config: AppConfig) -> Result<AppState> {
    let config = Arc::new(config);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.outbound.timeout_secs))
        .build()
        .context("building outbound HTTP client")?;

    // Tenant metadata comes from the registry before any key material moves.
    // Listing tenants is unauthenticated, so an empty token set suffices here.
    let unauthenticated = Arc::new(ServiceTokens::new(HashMap::new(), String::new()));
    let preliminary = TenantsClient::new(
        http.clone(),
        &config.tenants_api.base_url,
        unauthenticated,
        &config.service.service_tenant_id,
        &config.service.service_name,
    );
    let defaults = TtlDefaults {
        access_token_ttl: config.dev.default_access_token_ttl,
        refresh_token_ttl: config.dev.default_refresh_token_ttl,
    };

    let cache = Arc::new(TenantCache::new());
    if config.sk.use_sk {
        let records = preliminary
            .list_tenants()
            .await
            .context("fetching tenant metadata from the Tenants registry")?;
        for record in &records {
            cache.insert(Tenant::from_record(record, defaults));
        }
    } else {
        // Dev mode runs without a registry; serve the allow-listed tenants
        // with config-supplied defaults and the site-admin key everywhere.
        // The service's own admin tenant is always present: the service
        // tokens are minted against it.
        for tenant_id in &config.service.tenants {
            cache.insert(dev_tenant(&config, tenant_id, defaults));
        }
        if cache.get(&config.service.service_tenant_id).is_err() {
            cache.insert(dev_tenant(&config, &config.service.service_tenant_id, defaults));
        }
    }

    tracing::debug!("tenant cache populated with {} tenants", cache.tenant_ids().len());

    // Self-issue one 10-year service token per site-admin tenant, signed with
    // the injected key. These are the credentials for every outbound call.
    let admin_tokens = mint_service_tokens(&config, &cache)?;
    let service_tokens = Arc::new(resolve_service_tokens(&config, &cache, admin_tokens)?);

    let sk = SkClient::new(
        http.clone(),
        &config.sk.base_url,
        service_tokens.clone(),
        &config.service.service_tenant_id,
        &config.service.service_name,
    );
    let registry = TenantsClient::new(
        http.clone(),
        &config.tenants_api.base_url,
        service_tokens.clone(),
        &config.service.service_tenant_id,
        &config.service.service_name,
    );
    let site_router = SiteRouterClient::new(
        http,
        &config.tenants_api.base_url,
        service_tokens.clone(),
        &config.service.service_tenant_id,
        &config.service.service_name,
    );

    if config.sk.use_sk {
        // The service cannot rotate keys without this role; better to find
        // out now than during the first PUT /v3/tokens/keys.
        let authorized = sk
            .has_role(
                "tenant_definition_updater",
                &config.service.service_name,
                &config.service.service_tenant_id,
            )
            .await
            .context("checking the tenant_definition_updater role with the SK")?;
        if !authorized {
            bail!(
                "the {} principal does not hold the tenant_definition_updater role in tenant {}",
                config.service.service_name,
                config.service.service_tenant_id
            );
        }

        fetch_signing_keys(&config, &cache, &sk).await?;
    } else {
        for tenant_id in cache.tenant_ids() {
            cache
                .set_private_key(&tenant_id, &config.dev.site_admin_privatekey)
                .expect("tenant disappeared from cache during bootstrap");
        }
    }

    cache.mark_ready();
    tracing::info!("bootstrap complete; tenant cache is ready");

    Ok(AppState {
        config,
        cache,
        sk,
        registry,
        site_router,
        service_tokens,
    })
}

fn dev_tenant(config: &AppConfig, tenant_id: &str, defaults: TtlDefaults) -> Tenant {
    Tenant {
        tenant_id: tenant_id.to_string(),
        site_id: config.service.service_site_id.clone(),
        site_admin_tenant_id: config.service.service_tenant_id.clone(),
        issuer: format!(
            "{}/v3/tokens",
            config.tenants_api.primary_site_admin_base_url
        ),
        status: crate::tenants::TenantStatus::Active,
        access_token_ttl: defaults.access_token_ttl,
        refresh_token_ttl: defaults.refresh_token_ttl,
        private_key: String::new(),
        public_key: config.dev.site_admin_publickey.clone(),
    }
}

/// One self-signed service token per site-admin tenant in the cache, keyed by
/// that admin tenant's id.
fn mint_service_tokens(
    config: &AppConfig,
    cache: &TenantCache,
) -> Result<HashMap<String, String>> {
    let mut admin_tokens = HashMap::new();
    for admin_id in cache.iter_site_admin_tenants() {
        let tenant = cache
            .get(&admin_id)
            .with_context(|| format!("site-admin tenant {} missing from the cache", admin_id))?;
        let request = NewTokenRequest {
            token_tenant_id: admin_id.clone(),
            token_username: config.service.service_name.clone(),
            account_type: Some(AccountType::Service),
            access_token_ttl: Some(SERVICE_TOKEN_TTL as i64),
            target_site_id: Some(tenant.site_id.clone()),
            ..Default::default()
        };
        let mut token = TapisAccessToken::derive_for_tenant(&request, &tenant)
            .with_context(|| format!("deriving the service token for tenant {}", admin_id))?;
        let jwt = token
            .sign(&config.dev.site_admin_privatekey)
            .with_context(|| format!("signing the service token for tenant {}", admin_id))?;
        tracing::debug!("generated and signed service token for tenant {}", admin_id);
        admin_tokens.insert(admin_id, jwt);
    }
    Ok(admin_tokens)
}

/// Flatten the per-admin-tenant tokens into a per-tenant lookup so outbound
/// clients never need the cache to pick a credential.
fn resolve_service_tokens(
    config: &AppConfig,
    cache: &TenantCache,
    admin_tokens: HashMap<String, String>,
) -> Result<ServiceTokens> {
    let default_admin = cache
        .get(&config.service.service_tenant_id)
        .map(|t| t.site_admin_tenant_id.clone())
        .unwrap_or_else(|_| config.service.service_tenant_id.clone());
    let default_token = admin_tokens
        .get(&default_admin)
        .cloned()
        .context("no service token for the service's own site-admin tenant")?;

    let mut by_tenant = HashMap::new();
    for tenant_id in cache.tenant_ids() {
        let tenant = cache.get(&tenant_id).expect("cache changed during bootstrap");
        if let Some(token) = admin_tokens.get(&tenant.site_admin_tenant_id) {
            by_tenant.insert(tenant_id, token.clone());
        }
    }
    Ok(ServiceTokens::new(by_tenant, default_token))
}

/// Pull each site-local tenant's signing key out of the SK. Tenants owned by
/// other sites are served read-only (signature verification) and carry no
/// private key here.
async fn fetch_signing_keys(
    config: &AppConfig,
    cache: &TenantCache,
    sk: &SkClient,
) -> Result<()> {
    for tenant_id in cache.tenant_ids() {
        let tenant = cache.get(&tenant_id).expect("cache changed during bootstrap");
        if tenant.site_id != config.service.service_site_id {
            continue;
        }
        if !config.service.tenants.is_empty() && !config.service.tenants.contains(&tenant_id) {
            tracing::debug!("skipping tenant {}: not in the configured tenant list", tenant_id);
            continue;
        }
        let secret = sk
            .read_secret("jwtsigning", "keys", &tenant_id, &config.service.service_name)
            .await
            .with_context(|| format!("reading the signing key for tenant {} from the SK", tenant_id))?;
        let private_key = secret
            .private_key
            .with_context(|| format!("SK returned no private key for tenant {}", tenant_id))?;
        cache
            .set_private_key(&tenant_id, &private_key)
            .expect("tenant disappeared from cache during bootstrap");
        tracing::debug!("loaded signing key for tenant {}", tenant_id);
    }
    Ok(())
}
