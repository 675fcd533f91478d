use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

use crate::tenants::{Tenant, TenantCache};

/// Prefix for all non-standard claims.
pub const NAMESPACE_PRETEXT: &str = "tapis/";

/// Claims that caller-supplied extra claims may never override. Single
/// source of truth, consulted both at derivation and at payload validation.
pub static STANDARD_ACCESS_CLAIMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "jti",
        "iss",
        "sub",
        "tenant",
        "target_site",
        "username",
        "account_type",
        "exp",
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    User,
    Service,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::User => write!(f, "user"),
            AccountType::Service => write!(f, "service"),
        }
    }
}

/// POST /v3/tokens request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTokenRequest {
    pub token_tenant_id: String,
    pub token_username: String,
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub access_token_ttl: Option<i64>,
    #[serde(default)]
    pub generate_refresh_token: Option<bool>,
    #[serde(default)]
    pub refresh_token_ttl: Option<i64>,
    #[serde(default)]
    pub delegation_token: Option<bool>,
    #[serde(default)]
    pub delegation_sub_tenant_id: Option<String>,
    #[serde(default)]
    pub delegation_sub_username: Option<String>,
    #[serde(default)]
    pub target_site_id: Option<String>,
    #[serde(default)]
    pub claims: Option<Map<String, Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Unknown tenant: {0}. This service does not mint tokens for it.")]
    UnknownTenant(String),
    #[error("The target_site_id claim is required for 'service' tokens.")]
    MissingTargetSite,
    #[error("The target_site_id claim is only allowed for 'service' tokens.")]
    UnexpectedTargetSite,
    #[error(
        "Both delegation_sub_tenant_id and delegation_sub_username are required \
         when generating a delegation token."
    )]
    MissingDelegationSub,
    #[error("Passing claim {0} as an extra claim is not allowed, as it is a standard claim.")]
    ClaimCollision(String),
    #[error("Unsupported signing algorithm: {0}; only RS256 is allowed")]
    UnsupportedAlgorithm(String),
    #[error(transparent)]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Reject extra claims that would shadow a standard claim.
pub fn check_extra_claims(claims: &Map<String, Value>) -> Result<(), TokenError> {
    for key in claims.keys() {
        if STANDARD_ACCESS_CLAIMS.contains(key.as_str()) {
            return Err(TokenError::ClaimCollision(key.clone()));
        }
    }
    Ok(())
}

pub fn compute_sub(tenant_id: &str, username: &str) -> String {
    format!("{}@{}", username, tenant_id)
}

pub fn compute_exp(ttl: u64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(ttl as i64)
}

/// An access token and the metadata needed to serialize its wire envelope.
#[derive(Debug, Clone)]
pub struct TapisAccessToken {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub tenant_id: String,
    pub username: String,
    pub account_type: AccountType,
    pub delegation: bool,
    pub delegation_sub: Option<String>,
    pub target_site_id: Option<String>,
    pub extra_claims: Option<Map<String, Value>>,
    pub ttl: u64,
    pub exp: DateTime<Utc>,
    alg: Algorithm,
    /// Compact JWS, present once signed.
    pub jwt: Option<String>,
}

impl TapisAccessToken {
    /// Compute derived values for an access token from the request body and
    /// tenant defaults. The tenant must be one this instance serves.
    pub fn derive(
        data: &NewTokenRequest,
        cache: &TenantCache,
        served_tenants: &[String],
    ) -> Result<Self, TokenError> {
        if !served_tenants.is_empty() && !served_tenants.contains(&data.token_tenant_id) {
            return Err(TokenError::UnknownTenant(data.token_tenant_id.clone()));
        }
        let tenant = cache
            .get(&data.token_tenant_id)
            .map_err(|_| TokenError::UnknownTenant(data.token_tenant_id.clone()))?;
        Self::derive_for_tenant(data, &tenant)
    }

    /// Derivation against a resolved tenant; bootstrap uses this directly to
    /// self-issue service tokens for tenants outside the allow-list.
    pub fn derive_for_tenant(data: &NewTokenRequest, tenant: &Tenant) -> Result<Self, TokenError> {
        let account_type = data.account_type.unwrap_or(AccountType::User);

        // service tokens must carry a target site; user tokens must not
        let target_site_id = match (account_type, data.target_site_id.as_ref()) {
            (AccountType::Service, Some(site)) => Some(site.clone()),
            (AccountType::Service, None) => return Err(TokenError::MissingTargetSite),
            (AccountType::User, Some(_)) => return Err(TokenError::UnexpectedTargetSite),
            (AccountType::User, None) => None,
        };

        let delegation = data.delegation_token.unwrap_or(false);
        let delegation_sub = if delegation {
            match (
                data.delegation_sub_tenant_id.as_ref(),
                data.delegation_sub_username.as_ref(),
            ) {
                (Some(tenant_id), Some(username)) => Some(compute_sub(tenant_id, username)),
                _ => return Err(TokenError::MissingDelegationSub),
            }
        } else {
            None
        };

        if let Some(claims) = &data.claims {
            check_extra_claims(claims)?;
        }

        let ttl = match data.access_token_ttl {
            Some(t) if t > 0 => t as u64,
            _ => tenant.access_token_ttl,
        };

        Ok(Self {
            jti: Uuid::new_v4().to_string(),
            iss: tenant.issuer.clone(),
            sub: compute_sub(&data.token_tenant_id, &data.token_username),
            tenant_id: data.token_tenant_id.clone(),
            username: data.token_username.clone(),
            account_type,
            delegation,
            delegation_sub,
            target_site_id,
            extra_claims: data.claims.clone(),
            ttl,
            exp: compute_exp(ttl),
            alg: Algorithm::RS256,
            jwt: None,
        })
    }

    /// The claim dictionary that gets signed. `delegation_sub` is always
    /// present (null when unset); `target_site` only for service tokens.
    /// Extra claims merge at top level, never under the namespace.
    pub fn claims_to_value(&self) -> Map<String, Value> {
        let mut d = Map::new();
        d.insert("jti".into(), json!(self.jti));
        d.insert("iss".into(), json!(self.iss));
        d.insert("sub".into(), json!(self.sub));
        d.insert(format!("{NAMESPACE_PRETEXT}tenant_id"), json!(self.tenant_id));
        d.insert(format!("{NAMESPACE_PRETEXT}token_type"), json!("access"));
        d.insert(format!("{NAMESPACE_PRETEXT}delegation"), json!(self.delegation));
        d.insert(
            format!("{NAMESPACE_PRETEXT}delegation_sub"),
            json!(self.delegation_sub),
        );
        d.insert(format!("{NAMESPACE_PRETEXT}username"), json!(self.username));
        d.insert(
            format!("{NAMESPACE_PRETEXT}account_type"),
            json!(self.account_type),
        );
        d.insert("exp".into(), json!(self.exp.timestamp()));
        if let Some(site) = &self.target_site_id {
            d.insert(format!("{NAMESPACE_PRETEXT}target_site"), json!(site));
        }
        if let Some(extra) = &self.extra_claims {
            for (k, v) in extra {
                d.insert(k.clone(), v.clone());
            }
        }
        d
    }

    /// Sign the claim dictionary with the tenant private key. RS256 only.
    pub fn sign(&mut self, private_key_pem: &str) -> Result<String, TokenError> {
        let jwt = sign_claims(self.alg, &self.claims_to_value(), private_key_pem)?;
        self.jwt = Some(jwt.clone());
        Ok(jwt)
    }

    /// Wire envelope: `{jti, access_token, expires_in, expires_at}`.
    pub fn serialize(&self) -> Value {
        json!({
            "jti": self.jti,
            "access_token": self.jwt,
            "expires_in": self.ttl,
            "expires_at": self.exp.to_rfc3339(),
        })
    }
}

/// A refresh token. Carries no identity claims of its own beyond `sub`; the
/// companion access token's claims ride along in `tapis/access_token` so the
/// refresh operation can re-materialize an equivalent access token.
#[derive(Debug, Clone)]
pub struct TapisRefreshToken {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub tenant_id: String,
    /// TTL this refresh token was first issued with; preserved verbatim
    /// across refresh cycles.
    pub ttl: u64,
    pub exp: DateTime<Utc>,
    /// Companion access-token claims minus `exp`, plus `ttl`.
    pub access_token: Map<String, Value>,
    alg: Algorithm,
    pub jwt: Option<String>,
}

impl TapisRefreshToken {
    /// Build the refresh token paired with `access`. `requested_ttl` wins
    /// when positive, otherwise the tenant default applies; on a refresh the
    /// caller passes the outer `tapis/initial_ttl` here so the TTL stays
    /// invariant across cycles.
    pub fn from_access(
        access: &TapisAccessToken,
        requested_ttl: Option<i64>,
        tenant: &Tenant,
    ) -> Self {
        let mut nested = access.claims_to_value();
        nested.remove("exp");
        nested.insert("ttl".into(), json!(access.ttl));

        let ttl = match requested_ttl {
            Some(t) if t > 0 => t as u64,
            _ => tenant.refresh_token_ttl,
        };

        Self {
            jti: Uuid::new_v4().to_string(),
            iss: access.iss.clone(),
            sub: access.sub.clone(),
            tenant_id: access.tenant_id.clone(),
            ttl,
            exp: compute_exp(ttl),
            access_token: nested,
            alg: Algorithm::RS256,
            jwt: None,
        }
    }

    /// Claim dictionary for signing. Deliberately omits `username`,
    /// `account_type`, `delegation*`, `target_site`, and extra claims so a
    /// refresh token can never pass for an access token.
    pub fn claims_to_value(&self) -> Map<String, Value> {
        let mut d = Map::new();
        d.insert("jti".into(), json!(self.jti));
        d.insert("iss".into(), json!(self.iss));
        d.insert("sub".into(), json!(self.sub));
        d.insert(format!("{NAMESPACE_PRETEXT}initial_ttl"), json!(self.ttl));
        d.insert(format!("{NAMESPACE_PRETEXT}tenant_id"), json!(self.tenant_id));
        d.insert(format!("{NAMESPACE_PRETEXT}token_type"), json!("refresh"));
        d.insert("exp".into(), json!(self.exp.timestamp()));
        d.insert(
            format!("{NAMESPACE_PRETEXT}access_token"),
            Value::Object(self.access_token.clone()),
        );
        d
    }

    pub fn sign(&mut self, private_key_pem: &str) -> Result<String, TokenError> {
        let jwt = sign_claims(self.alg, &self.claims_to_value(), private_key_pem)?;
        self.jwt = Some(jwt.clone());
        Ok(jwt)
    }

    pub fn serialize(&self) -> Value {
        json!({
            "jti": self.jti,
            "refresh_token": self.jwt,
            "expires_in": self.ttl,
            "expires_at": self.exp.to_rfc3339(),
        })
    }
}

/// Rebuild an (unsigned) access token from the validated claims of a refresh
/// token. The nested `tapis/access_token` object is authoritative: its `ttl`
/// drives the new `exp`, its namespaced fields become the top-level model
/// fields, and whatever remains rides along as extra claims.
pub fn rebuild_access_from_refresh(
    refresh_claims: &Map<String, Value>,
) -> Result<TapisAccessToken, TokenError> {
    let nested = refresh_claims
        .get(&format!("{NAMESPACE_PRETEXT}access_token"))
        .and_then(Value::as_object)
        .ok_or_else(|| TokenError::UnknownTenant("<missing access_token claim>".into()))?;

    let mut remaining = nested.clone();
    remaining.remove(&format!("{NAMESPACE_PRETEXT}token_type"));

    let take_str = |m: &mut Map<String, Value>, k: &str| -> Option<String> {
        m.remove(k).and_then(|v| v.as_str().map(str::to_string))
    };

    let iss = take_str(&mut remaining, "iss").unwrap_or_default();
    let sub = take_str(&mut remaining, "sub").unwrap_or_default();
    remaining.remove("jti");
    let tenant_id = take_str(&mut remaining, &format!("{NAMESPACE_PRETEXT}tenant_id"))
        .ok_or_else(|| TokenError::UnknownTenant("<missing tenant_id claim>".into()))?;
    let username =
        take_str(&mut remaining, &format!("{NAMESPACE_PRETEXT}username")).unwrap_or_default();
    let account_type = remaining
        .remove(&format!("{NAMESPACE_PRETEXT}account_type"))
        .and_then(|v| serde_json::from_value::<AccountType>(v).ok())
        .unwrap_or(AccountType::User);
    let ttl = remaining
        .remove("ttl")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let delegation = remaining
        .remove(&format!("{NAMESPACE_PRETEXT}delegation"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let delegation_sub = remaining
        .remove(&format!("{NAMESPACE_PRETEXT}delegation_sub"))
        .and_then(|v| v.as_str().map(str::to_string));

    // everything left over (including any tapis/target_site) is preserved
    // verbatim in the refreshed token
    let extra_claims = if remaining.is_empty() {
        None
    } else {
        Some(remaining)
    };

    Ok(TapisAccessToken {
        jti: Uuid::new_v4().to_string(),
        iss,
        sub,
        tenant_id,
        username,
        account_type,
        delegation,
        delegation_sub,
        target_site_id: None,
        extra_claims,
        ttl,
        exp: compute_exp(ttl),
        alg: Algorithm::RS256,
        jwt: None,
    })
}

fn sign_claims(
    alg: Algorithm,
    claims: &Map<String, Value>,
    private_key_pem: &str,
) -> Result<String, TokenError> {
    if alg != Algorithm::RS256 {
        return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", alg)));
    }
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
    let token = encode(&Header::new(Algorithm::RS256), claims, &key)?;
    Ok(token)
}
