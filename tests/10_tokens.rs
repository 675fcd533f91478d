mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn hello_responds() -> Result<()> {
    let app = common::app(false);
    let (status, body) =
        common::request(&app, Method::GET, "/v3/tokens/hello", &[], None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    Ok(())
}

#[tokio::test]
async fn ready_reports_cache_state() -> Result<()> {
    // dev mode skips the SK ping, so a populated cache is enough
    let app = common::app(false);
    let (status, body) =
        common::request(&app, Method::GET, "/v3/tokens/ready", &[], None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["ready"], json!(true));
    Ok(())
}

#[tokio::test]
async fn invalid_post_is_rejected() -> Result<()> {
    let app = common::app(false);
    let (status, _) = common::request(&app, Method::POST, "/v3/tokens", &[], None).await;
    assert!(status.is_client_error(), "unexpected status: {status}");
    Ok(())
}

#[tokio::test]
async fn valid_post_mints_an_access_token() -> Result<()> {
    let app = common::app(false);
    let payload = json!({
        "token_tenant_id": "dev",
        "account_type": "service",
        "token_username": "files",
        "target_site_id": "tacc",
    });
    let (status, body) =
        common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["message"], "Token generation successful.");
    let envelope = &body["result"]["access_token"];
    assert!(envelope["access_token"].is_string());
    assert!(envelope["expires_at"].is_string());
    assert_eq!(envelope["expires_in"], json!(300));

    let claims = common::decode_claims(envelope["access_token"].as_str().unwrap());
    assert_eq!(claims["sub"], json!("files@dev"));
    assert_eq!(claims["iss"], json!("https://dev.develop.tapis.io/v3/tokens"));
    assert_eq!(claims["tapis/tenant_id"], json!("dev"));
    assert_eq!(claims["tapis/token_type"], json!("access"));
    assert_eq!(claims["tapis/account_type"], json!("service"));
    assert_eq!(claims["tapis/target_site"], json!("tacc"));
    assert_eq!(claims["jti"], envelope["jti"]);
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_is_rejected() -> Result<()> {
    let app = common::app(false);
    let payload = json!({
        "token_tenant_id": "nosuch",
        "account_type": "user",
        "token_username": "jdoe",
    });
    let (status, _) =
        common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn service_token_requires_target_site() -> Result<()> {
    let app = common::app(false);
    let payload = json!({
        "token_tenant_id": "dev",
        "account_type": "service",
        "token_username": "files",
    });
    let (status, _) =
        common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn zero_ttls_fall_back_to_tenant_defaults() -> Result<()> {
    let app = common::app(false);
    let payload = json!({
        "token_tenant_id": "dev",
        "account_type": "user",
        "token_username": "jdoe",
        "access_token_ttl": 0,
        "generate_refresh_token": true,
        "refresh_token_ttl": 0,
    });
    let (status, body) =
        common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["result"]["access_token"]["expires_in"], json!(300));
    assert_eq!(body["result"]["refresh_token"]["expires_in"], json!(600));
    Ok(())
}

#[tokio::test]
async fn extra_claim_colliding_with_standard_claim_is_rejected() -> Result<()> {
    let app = common::app(false);
    for reserved in ["jti", "iss", "sub", "tenant", "target_site", "username", "account_type", "exp"] {
        let payload = json!({
            "token_tenant_id": "dev",
            "account_type": "user",
            "token_username": "jdoe",
            "claims": { reserved: "boom" },
        });
        let (status, _) =
            common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "claim {reserved} was not rejected");
    }
    Ok(())
}

#[tokio::test]
async fn custom_claims_show_up_in_access_token() -> Result<()> {
    let app = common::app(false);
    let payload = json!({
        "token_tenant_id": "dev",
        "account_type": "user",
        "token_username": "jdoe",
        "claims": { "test_claim": "here it is!" },
    });
    let (status, body) =
        common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    let token = body["result"]["access_token"]["access_token"].as_str().unwrap();
    let claims = common::decode_claims(token);
    assert_eq!(claims["test_claim"], json!("here it is!"));
    Ok(())
}

#[tokio::test]
async fn jtis_are_unique_across_mints() -> Result<()> {
    let app = common::app(false);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..10 {
        let payload = json!({
            "token_tenant_id": "dev",
            "account_type": "user",
            "token_username": "jdoe",
        });
        let (status, body) =
            common::request(&app, Method::POST, "/v3/tokens", &[], Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        let jti = body["result"]["access_token"]["jti"].as_str().unwrap().to_string();
        assert!(seen.insert(jti), "duplicate jti minted");
    }
    Ok(())
}
