use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{read_envelope, ClientError, ServiceTokens};

const SERVICE: &str = "security-kernel";

/// Client for the Security Kernel. Every call authenticates with the service
/// token for the target tenant's site and identifies this service through the
/// `X-Tapis-Tenant` / `X-Tapis-User` headers.
#[derive(Clone)]
pub struct SkClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<ServiceTokens>,
    service_tenant_id: String,
    service_name: String,
}

/// Secret payload returned by `readSecret`.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretMap {
    #[serde(rename = "privateKey")]
    pub private_key: Option<String>,
    #[serde(rename = "publicKey")]
    pub public_key: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretResult {
    #[serde(rename = "secretMap")]
    secret_map: SecretMap,
}

#[derive(Debug, Deserialize)]
struct AuthorizedResult {
    #[serde(rename = "isAuthorized")]
    is_authorized: bool,
}

#[derive(Debug, Deserialize)]
struct NamesResult {
    names: Vec<String>,
}

impl SkClient {
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

    fn request(&self, method: reqwest::Method, path: &str, tenant: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Tapis-Token", self.tokens.for_tenant(tenant))
            .header("X-Tapis-Tenant", &self.service_tenant_id)
            .header("X-Tapis-User", &self.service_name)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        url: String,
    ) -> Result<reqwest::Response, ClientError> {
        builder
            .send()
            .await
            .map_err(|source| ClientError::Http { url, source })
    }

    pub async fn read_secret(
        &self,
        secret_type: &str,
        secret_name: &str,
        tenant: &str,
        user: &str,
    ) -> Result<SecretMap, ClientError> {
        let path = format!("/v3/security/vault/secret/{}/{}", secret_type, secret_name);
        let builder = self
            .request(reqwest::Method::GET, &path, tenant)
            .query(&[("tenant", tenant), ("user", user)]);
        let response = self.send(builder, path).await?;
        let result: SecretResult = read_envelope(SERVICE, response).await?;
        Ok(result.secret_map)
    }

    pub async fn write_secret(
        &self,
        secret_type: &str,
        secret_name: &str,
        tenant: &str,
        user: &str,
        data: Value,
    ) -> Result<(), ClientError> {
        let path = format!("/v3/security/vault/secret/{}/{}", secret_type, secret_name);
        let builder = self
            .request(reqwest::Method::POST, &path, tenant)
            .query(&[("tenant", tenant), ("user", user)])
            .json(&json!({ "data": data }));
        let response = self.send(builder, path).await?;
        let _: Value = read_envelope(SERVICE, response).await?;
        Ok(())
    }

    /// Check a service password. The candidate travels to the SK; the stored
    /// secret never travels back.
    pub async fn validate_service_password(
        &self,
        secret_type: &str,
        secret_name: &str,
        tenant: &str,
        user: &str,
        password: &str,
    ) -> Result<bool, ClientError> {
        let path = format!(
            "/v3/security/vault/secret/{}/{}/validate",
            secret_type, secret_name
        );
        let builder = self
            .request(reqwest::Method::POST, &path, tenant)
            .query(&[("tenant", tenant), ("user", user)])
            .json(&json!({ "password": password }));
        let response = self.send(builder, path).await?;
        let result: AuthorizedResult = read_envelope(SERVICE, response).await?;
        Ok(result.is_authorized)
    }

    pub async fn has_role(
        &self,
        role_name: &str,
        user: &str,
        tenant: &str,
    ) -> Result<bool, ClientError> {
        let path = "/v3/security/user/hasRole";
        let builder = self
            .request(reqwest::Method::GET, path, tenant)
            .query(&[("roleName", role_name), ("user", user), ("tenant", tenant)]);
        let response = self.send(builder, path.to_string()).await?;
        let result: AuthorizedResult = read_envelope(SERVICE, response).await?;
        Ok(result.is_authorized)
    }

    pub async fn get_users_with_role(
        &self,
        role_name: &str,
        tenant: &str,
    ) -> Result<Vec<String>, ClientError> {
        let path = format!("/v3/security/role/{}/users", role_name);
        let builder = self
            .request(reqwest::Method::GET, &path, tenant)
            .query(&[("tenant", tenant)]);
        let response = self.send(builder, path).await?;
        let result: NamesResult = read_envelope(SERVICE, response).await?;
        Ok(result.names)
    }

    /// Cheap reachability probe for the readiness endpoint.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let url = format!("{}/v3/security/healthcheck", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Api {
                service: SERVICE,
                status: response.status().as_u16(),
                message: "healthcheck failed".to_string(),
            })
        }
    }
}
