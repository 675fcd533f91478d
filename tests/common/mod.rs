use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use serde_json::{Map, Value};
use tower::ServiceExt;

use tokens_api_rust::clients::site_router::SiteRouterClient;
use tokens_api_rust::clients::sk::SkClient;
use tokens_api_rust::clients::tenants::TenantsClient;
use tokens_api_rust::clients::ServiceTokens;
use tokens_api_rust::config::{
    AppConfig, DevConfig, OutboundConfig, ServiceConfig, SkConfig, TenantsApiConfig,
};
use tokens_api_rust::handlers;
use tokens_api_rust::services::AppState;
use tokens_api_rust::tenants::{Tenant, TenantCache, TenantStatus};

static KEYPAIR: OnceLock<(String, String)> = OnceLock::new();

/// One RSA key pair per test binary; generation is slow enough to share.
pub fn test_keypair() -> &'static (String, String) {
    KEYPAIR.get_or_init(|| {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
            .expect("failed to generate RSA key");
        let private_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("failed to encode private key")
            .to_string();
        let public_pem = key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("failed to encode public key");
        (private_pem, public_pem)
    })
}

pub fn test_tenant(tenant_id: &str) -> Tenant {
    let (private_pem, public_pem) = test_keypair();
    Tenant {
        tenant_id: tenant_id.to_string(),
        site_id: "tacc".to_string(),
        site_admin_tenant_id: "admin".to_string(),
        issuer: format!("https://{}.develop.tapis.io/v3/tokens", tenant_id),
        status: TenantStatus::Active,
        access_token_ttl: 300,
        refresh_token_ttl: 600,
        private_key: private_pem.clone(),
        public_key: public_pem.clone(),
    }
}

/// Config pointing every outbound client at a dead port; tests tweak it
/// before wiring a state around it.
pub fn test_config(use_sk: bool) -> AppConfig {
    let (private_pem, public_pem) = test_keypair();
    AppConfig {
        service: ServiceConfig {
            service_name: "tokens".to_string(),
            service_tenant_id: "admin".to_string(),
            service_site_id: "tacc".to_string(),
            tenants: vec!["dev".to_string(), "admin".to_string()],
            port: 0,
        },
        sk: SkConfig {
            use_sk,
            base_url: "http://127.0.0.1:9".to_string(),
        },
        tenants_api: TenantsApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            primary_site_admin_base_url: "https://admin.develop.tapis.io".to_string(),
        },
        dev: DevConfig {
            site_admin_privatekey: private_pem.clone(),
            site_admin_publickey: public_pem.clone(),
            use_allservices_password: false,
            allservices_password: String::new(),
            default_access_token_ttl: 300,
            default_refresh_token_ttl: 600,
        },
        outbound: OutboundConfig { timeout_secs: 2 },
    }
}

/// A fully wired state that needs no network: the cache is pre-populated
/// with signing keys.
pub fn state_from_config(config: AppConfig) -> AppState {
    let config = Arc::new(config);
    let cache = Arc::new(TenantCache::from_entries([
        test_tenant("dev"),
        test_tenant("admin"),
    ]));
    let service_tokens = Arc::new(ServiceTokens::new(
        HashMap::new(),
        "test-service-token".to_string(),
    ));
    let http = reqwest::Client::new();

    AppState {
        config: config.clone(),
        cache,
        sk: SkClient::new(
            http.clone(),
            &config.sk.base_url,
            service_tokens.clone(),
            "admin",
            "tokens",
        ),
        registry: TenantsClient::new(
            http.clone(),
            &config.tenants_api.base_url,
            service_tokens.clone(),
            "admin",
            "tokens",
        ),
        site_router: SiteRouterClient::new(
            http,
            &config.tenants_api.base_url,
            service_tokens.clone(),
            "admin",
            "tokens",
        ),
        service_tokens,
    }
}

pub fn test_state(use_sk: bool) -> AppState {
    state_from_config(test_config(use_sk))
}

pub fn app(use_sk: bool) -> Router {
    handlers::build_router(test_state(use_sk))
}

/// Drive one request through the router and return (status, parsed body).
pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("failed to build request");

    let response = app.clone().oneshot(request).await.expect("router error");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Decode a minted token with full signature and expiry validation.
pub fn decode_claims(token: &str) -> Map<String, Value> {
    let (_, public_pem) = test_keypair();
    let key = DecodingKey::from_rsa_pem(public_pem.as_bytes()).expect("bad test public key");
    let validation = Validation::new(Algorithm::RS256);
    decode::<Map<String, Value>>(token, &key, &validation)
        .expect("token failed validation")
        .claims
}
