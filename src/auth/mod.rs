use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::services::AppState;
use crate::tenants::TenantCache;
use crate::tokens::{AccountType, NewTokenRequest, NAMESPACE_PRETEXT};

/// Identity established for the current request from a validated bearer
/// token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub username: String,
    pub tenant_id: String,
    pub account_type: AccountType,
}

#[derive(Debug)]
pub struct BasicAuthParts {
    pub username: String,
    pub password: String,
}

/// Decode the HTTP Basic Authorization header if one is present. Does NOT
/// validate the password; that is the caller's job.
pub fn get_basic_auth_parts(headers: &HeaderMap) -> Result<Option<BasicAuthParts>, ApiError> {
    let Some(value) = headers.get("authorization") else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::authentication("Unable to parse HTTP Basic Authorization header."))?;
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };
    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| ApiError::authentication("Unable to parse HTTP Basic Authorization header."))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ApiError::authentication("Unable to parse HTTP Basic Authorization header."))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::authentication("Unable to parse HTTP Basic Authorization header."))?;
    Ok(Some(BasicAuthParts {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

pub fn get_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-tapis-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate a compact JWS minted by some tenant this service knows about.
/// The tenant is read from the (unverified) claims first, then the signature
/// and expiry are checked against that tenant's published public key.
pub fn validate_token(cache: &TenantCache, raw: &str) -> Result<Map<String, Value>, ApiError> {
    let unverified = decode_unverified(raw)
        .map_err(|_| ApiError::authentication("Could not decode the Tapis token."))?;
    let tenant_id = unverified
        .get(&format!("{NAMESPACE_PRETEXT}tenant_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::authentication("Token is missing the tenant_id claim."))?;
    let tenant = cache
        .get(tenant_id)
        .map_err(|_| ApiError::authentication("Token was issued by an unknown tenant."))?;

    let key = DecodingKey::from_rsa_pem(tenant.public_key.as_bytes()).map_err(|e| {
        tracing::error!("bad public key cached for tenant {}: {}", tenant_id, e);
        ApiError::authentication("Could not validate the Tapis token.")
    })?;
    let validation = Validation::new(Algorithm::RS256);
    decode::<Map<String, Value>>(raw, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| ApiError::authentication("Invalid Tapis token: signature check failed or token expired."))
}

fn decode_unverified(raw: &str) -> Result<Map<String, Value>, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    decode::<Map<String, Value>>(raw, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
}

pub fn auth_context_from_claims(claims: &Map<String, Value>) -> Result<AuthContext, ApiError> {
    let get = |key: &str| -> Option<String> {
        claims
            .get(&format!("{NAMESPACE_PRETEXT}{key}"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let username = get("username")
        .ok_or_else(|| ApiError::authentication("Token is missing the username claim."))?;
    let tenant_id = get("tenant_id")
        .ok_or_else(|| ApiError::authentication("Token is missing the tenant_id claim."))?;
    let account_type = claims
        .get(&format!("{NAMESPACE_PRETEXT}account_type"))
        .cloned()
        .and_then(|v| serde_json::from_value::<AccountType>(v).ok())
        .unwrap_or(AccountType::User);
    Ok(AuthContext {
        username,
        tenant_id,
        account_type,
    })
}

/// Both credential kinds on one request means the caller's intent is
/// ambiguous; reject rather than pick one.
pub fn check_header_discipline(headers: &HeaderMap) -> Result<(), ApiError> {
    let has_basic = matches!(headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some(v) if v.starts_with("Basic "));
    if has_basic && get_bearer_token(headers).is_some() {
        return Err(ApiError::invalid_request(
            "Provide either HTTP Basic credentials or X-Tapis-Token, never both.",
        ));
    }
    Ok(())
}

/// Gate for POST /v3/tokens. Refresh (PUT) deliberately bypasses this:
/// possession of a valid refresh token is sufficient.
pub async fn check_create_token(
    state: &AppState,
    headers: &HeaderMap,
    payload: &NewTokenRequest,
) -> Result<(), ApiError> {
    check_header_discipline(headers)?;

    // Dev mode runs without the SK and without authn on token generation.
    if !state.config.sk.use_sk {
        return Ok(());
    }

    if let Some(parts) = get_basic_auth_parts(headers)? {
        return check_basic_path(state, &parts, payload).await;
    }
    check_bearer_path(state, headers, payload).await
}

/// Basic-auth path: a service authenticates with its SK-stored password and
/// may only mint for its own username.
async fn check_basic_path(
    state: &AppState,
    parts: &BasicAuthParts,
    payload: &NewTokenRequest,
) -> Result<(), ApiError> {
    if payload.token_username != parts.username {
        return Err(ApiError::authentication(
            "Invalid POST data -- username does not match auth header.",
        ));
    }
    if payload.token_tenant_id.is_empty() {
        return Err(ApiError::authentication(
            "Invalid POST data -- tenant_id missing from POST data.",
        ));
    }

    // Development convenience: one password for all services, honored only
    // against a develop instance and only when explicitly enabled.
    let config = &state.config;
    if config
        .tenants_api
        .primary_site_admin_base_url
        .contains("develop")
        && config.dev.use_allservices_password
        && !config.dev.allservices_password.is_empty()
        && parts.password == config.dev.allservices_password
    {
        tracing::debug!("accepted the all-services password for {}", parts.username);
        return Ok(());
    }

    let authorized = state
        .sk
        .validate_service_password(
            "service",
            "password",
            &payload.token_tenant_id,
            &parts.username,
            &parts.password,
        )
        .await
        .map_err(|e| {
            // An SK failure here must be indistinguishable from a bad
            // password, and is never retried.
            tracing::error!("SK error while validating a service password: {}", e);
            ApiError::authentication("Invalid service account/password combination.")
        })?;
    if !authorized {
        return Err(ApiError::authentication(
            "Invalid service account/password combination.",
        ));
    }
    Ok(())
}

/// Bearer path: own-tenant self-issue is free; everything else is
/// role-gated, and user tokens can never be minted in the site-admin tenant.
async fn check_bearer_path(
    state: &AppState,
    headers: &HeaderMap,
    payload: &NewTokenRequest,
) -> Result<(), ApiError> {
    let raw = get_bearer_token(headers).ok_or_else(|| {
        ApiError::authentication("No credentials supplied; provide HTTP Basic or X-Tapis-Token.")
    })?;
    let claims = validate_token(&state.cache, &raw)?;
    let caller = auth_context_from_claims(&claims)?;

    if payload.token_username == caller.username && payload.token_tenant_id == caller.tenant_id {
        return Ok(());
    }

    let account_type = payload.account_type.unwrap_or(AccountType::User);
    if account_type != AccountType::Service
        && payload.token_tenant_id == state.config.service.service_tenant_id
    {
        return Err(ApiError::authentication(
            "User tokens cannot be generated in the site-admin tenant.",
        ));
    }

    let role_name = format!("{}_token_generator", payload.token_tenant_id);
    let users = state
        .sk
        .get_users_with_role(&role_name, &caller.tenant_id)
        .await
        .map_err(|e| {
            tracing::error!("SK error fetching users with role {}: {}", role_name, e);
            ApiError::permission("Could not verify permissions with the Security Kernel.")
        })?;
    if !users.contains(&caller.username) {
        tracing::info!(
            "user {} is not in role {}; rejecting",
            caller.username,
            role_name
        );
        return Err(ApiError::permission(format!(
            "Not authorized to generate tokens in tenant {}.",
            payload.token_tenant_id
        )));
    }
    Ok(())
}

/// Gate for POST /v3/tokens/revoke: possession of some valid Tapis token.
pub fn check_revoke(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    check_header_discipline(headers)?;
    if !state.config.sk.use_sk {
        return Ok(());
    }
    let raw = get_bearer_token(headers)
        .ok_or_else(|| ApiError::authentication("The X-Tapis-Token header is required."))?;
    validate_token(&state.cache, &raw)?;
    Ok(())
}

/// Gate for PUT /v3/tokens/keys. The caller must hold
/// `tenant_definition_updater` in its own tenant, the target tenant must be
/// owned by this site, and the caller must either be in the target tenant or
/// be a service account from the same site.
pub async fn check_rotation(
    state: &AppState,
    headers: &HeaderMap,
    tenant_id: &str,
) -> Result<(), ApiError> {
    check_header_discipline(headers)?;
    if !state.config.sk.use_sk {
        return Ok(());
    }
    let raw = get_bearer_token(headers)
        .ok_or_else(|| ApiError::authentication("The X-Tapis-Token header is required."))?;
    let claims = validate_token(&state.cache, &raw)?;
    let caller = auth_context_from_claims(&claims)?;

    let users = state
        .sk
        .get_users_with_role("tenant_definition_updater", &caller.tenant_id)
        .await
        .map_err(|e| {
            tracing::error!("SK error fetching tenant_definition_updater holders: {}", e);
            ApiError::permission("Could not verify permissions with the Security Kernel.")
        })?;
    if !users.contains(&caller.username) {
        return Err(ApiError::permission(
            "Not authorized to update signing keys.",
        ));
    }

    // The registry resolves DRAFT and INACTIVE tenants too; rotation is how
    // a not-yet-live tenant gets its first real key pair.
    let target = state.registry.get_tenant(tenant_id).await?;
    if target.site_id != state.config.service.service_site_id {
        return Err(ApiError::permission(format!(
            "Tenant {} is owned by site {}, not by this site.",
            tenant_id, target.site_id
        )));
    }

    if caller.tenant_id == tenant_id {
        return Ok(());
    }
    if caller.account_type == AccountType::Service {
        if let Ok(caller_tenant) = state.cache.get(&caller.tenant_id) {
            if caller_tenant.site_id == target.site_id {
                return Ok(());
            }
        }
    }
    Err(ApiError::permission(format!(
        "Not authorized to update signing keys for tenant {}.",
        tenant_id
    )))
}
