use serde::{Deserialize, Serialize};
use std::env;

/// Service configuration, read once at startup. Bootstrap is fatal on a bad
/// config, so `from_env` returns an error instead of guessing at required
/// values like the site-admin private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub sk: SkConfig,
    pub tenants_api: TenantsApiConfig,
    pub dev: DevConfig,
    pub outbound: OutboundConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Principal this service acts as; always "tokens" in a real deployment.
    pub service_name: String,
    /// The site-admin tenant this service belongs to.
    pub service_tenant_id: String,
    /// The site this instance serves.
    pub service_site_id: String,
    /// Allow-list of tenants this instance will mint tokens for.
    pub tenants: Vec<String>,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkConfig {
    /// When false, no Security Kernel is contacted: every tenant signs with
    /// the site-admin private key and token generation is not gated.
    pub use_sk: bool,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantsApiConfig {
    pub base_url: String,
    /// Base URL of the primary-site admin tenant; the all-services password
    /// is only ever honored when this contains the substring "develop".
    pub primary_site_admin_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevConfig {
    /// PEM-encoded RSA private key for the site-admin tenant, injected
    /// out-of-band. This is the one key the service may hold before it can
    /// talk to the SK.
    pub site_admin_privatekey: String,
    /// Matching public key; only needed in dev mode, where no registry
    /// publishes one and inbound tokens still must verify.
    pub site_admin_publickey: String,
    pub use_allservices_password: bool,
    pub allservices_password: String,
    /// TTL defaults applied in dev mode, where tenant records carry none.
    pub default_access_token_ttl: u64,
    pub default_refresh_token_ttl: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Bound on every SK / Tenants / site-router call, in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required config: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Could not read {name} from {path}: {source}")]
    KeyFile {
        name: &'static str,
        path: String,
        source: std::io::Error,
    },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let service = ServiceConfig {
            service_name: env_or("SERVICE_NAME", "tokens"),
            service_tenant_id: require("SERVICE_TENANT_ID")?,
            service_site_id: require("SERVICE_SITE_ID")?,
            tenants: env::var("TOKENS_TENANTS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            port: parse_or("TOKENS_API_PORT", 8000)?,
        };

        let sk = SkConfig {
            use_sk: parse_or("USE_SK", true)?,
            base_url: env_or("SK_BASE_URL", "http://security-kernel:8000"),
        };

        let tenants_api = TenantsApiConfig {
            base_url: env_or("TENANTS_BASE_URL", "http://tenants-api:8000"),
            primary_site_admin_base_url: env_or(
                "PRIMARY_SITE_ADMIN_BASE_URL",
                "https://admin.tapis.io",
            ),
        };

        let dev = DevConfig {
            site_admin_privatekey: read_private_key()?,
            site_admin_publickey: env::var("SITE_ADMIN_PUBLICKEY")
                .map(|pem| pem.replace("\\n", "\n"))
                .unwrap_or_default(),
            use_allservices_password: parse_or("USE_ALLSERVICES_PASSWORD", false)?,
            allservices_password: env_or("ALLSERVICES_PASSWORD", ""),
            default_access_token_ttl: parse_or("DEV_DEFAULT_ACCESS_TOKEN_TTL", 300)?,
            default_refresh_token_ttl: parse_or("DEV_DEFAULT_REFRESH_TOKEN_TTL", 600)?,
        };

        let outbound = OutboundConfig {
            timeout_secs: parse_or("OUTBOUND_TIMEOUT_SECS", 10)?,
        };

        for (name, value) in [
            ("SK_BASE_URL", &sk.base_url),
            ("TENANTS_BASE_URL", &tenants_api.base_url),
            (
                "PRIMARY_SITE_ADMIN_BASE_URL",
                &tenants_api.primary_site_admin_base_url,
            ),
        ] {
            url::Url::parse(value).map_err(|_| ConfigError::Invalid {
                name,
                value: value.clone(),
            })?;
        }

        Ok(Self {
            service,
            sk,
            tenants_api,
            dev,
            outbound,
        })
    }
}

/// The private key may be supplied inline (with literal `\n` escapes, as is
/// common when injecting PEM material through container env) or as a file.
fn read_private_key() -> Result<String, ConfigError> {
    if let Ok(path) = env::var("SITE_ADMIN_PRIVATEKEY_FILE") {
        return std::fs::read_to_string(&path).map_err(|source| ConfigError::KeyFile {
            name: "SITE_ADMIN_PRIVATEKEY_FILE",
            path,
            source,
        });
    }
    match env::var("SITE_ADMIN_PRIVATEKEY") {
        Ok(pem) => Ok(pem.replace("\\n", "\n")),
        Err(_) => Err(ConfigError::Missing(
            "SITE_ADMIN_PRIVATEKEY or SITE_ADMIN_PRIVATEKEY_FILE",
        )),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        Err(_) => Ok(default),
    }
}
