mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

async fn mint(app: &axum::Router, payload: Value) -> Value {
    let (status, body) =
        common::request(app, Method::POST, "/v3/tokens", &[], Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "mint failed: {body}");
    body["result"].clone()
}

async fn refresh(app: &axum::Router, refresh_token: &str) -> Value {
    let (status, body) = common::request(
        app,
        Method::PUT,
        "/v3/tokens",
        &[],
        Some(json!({ "refresh_token": refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "refresh failed: {body}");
    body["result"].clone()
}

#[tokio::test]
async fn refresh_returns_a_new_pair() -> Result<()> {
    let app = common::app(false);
    let minted = mint(
        &app,
        json!({
            "token_tenant_id": "dev",
            "account_type": "service",
            "token_username": "files",
            "target_site_id": "tacc",
            "generate_refresh_token": true,
        }),
    )
    .await;

    let refreshed = refresh(&app, minted["refresh_token"]["refresh_token"].as_str().unwrap()).await;

    assert!(refreshed["access_token"]["access_token"].is_string());
    assert!(refreshed["refresh_token"]["refresh_token"].is_string());
    assert_ne!(
        minted["access_token"]["jti"],
        refreshed["access_token"]["jti"]
    );
    assert_ne!(
        minted["refresh_token"]["refresh_token"],
        refreshed["refresh_token"]["refresh_token"]
    );

    // the refreshed access token carries the same identity
    let claims = common::decode_claims(refreshed["access_token"]["access_token"].as_str().unwrap());
    assert_eq!(claims["sub"], json!("files@dev"));
    assert_eq!(claims["tapis/username"], json!("files"));
    assert_eq!(claims["tapis/account_type"], json!("service"));
    Ok(())
}

#[tokio::test]
async fn custom_ttls_are_invariant_across_refresh_cycles() -> Result<()> {
    let app = common::app(false);
    let minted = mint(
        &app,
        json!({
            "token_tenant_id": "dev",
            "account_type": "user",
            "token_username": "jdoe",
            "access_token_ttl": 14400,
            "generate_refresh_token": true,
            "refresh_token_ttl": 7776000,
        }),
    )
    .await;
    assert_eq!(minted["access_token"]["expires_in"], json!(14400));
    assert_eq!(minted["refresh_token"]["expires_in"], json!(7776000));

    let first = refresh(&app, minted["refresh_token"]["refresh_token"].as_str().unwrap()).await;
    assert_eq!(first["access_token"]["expires_in"], json!(14400));
    assert_eq!(first["refresh_token"]["expires_in"], json!(7776000));

    // and again: the TTLs survive an arbitrary number of cycles
    let second = refresh(&app, first["refresh_token"]["refresh_token"].as_str().unwrap()).await;
    assert_eq!(second["access_token"]["expires_in"], json!(14400));
    assert_eq!(second["refresh_token"]["expires_in"], json!(7776000));
    Ok(())
}

#[tokio::test]
async fn custom_claims_survive_refresh() -> Result<()> {
    let app = common::app(false);
    let minted = mint(
        &app,
        json!({
            "token_tenant_id": "dev",
            "account_type": "user",
            "token_username": "jdoe",
            "generate_refresh_token": true,
            "claims": { "test_claim": "here it is!" },
        }),
    )
    .await;

    let refreshed = refresh(&app, minted["refresh_token"]["refresh_token"].as_str().unwrap()).await;
    let claims = common::decode_claims(refreshed["access_token"]["access_token"].as_str().unwrap());
    assert_eq!(claims["test_claim"], json!("here it is!"));

    // still there after a second cycle
    let again = refresh(&app, refreshed["refresh_token"]["refresh_token"].as_str().unwrap()).await;
    let claims = common::decode_claims(again["access_token"]["access_token"].as_str().unwrap());
    assert_eq!(claims["test_claim"], json!("here it is!"));
    Ok(())
}

#[tokio::test]
async fn refresh_token_carries_no_identity_claims() -> Result<()> {
    let app = common::app(false);
    let minted = mint(
        &app,
        json!({
            "token_tenant_id": "dev",
            "account_type": "service",
            "token_username": "files",
            "target_site_id": "tacc",
            "generate_refresh_token": true,
            "claims": { "test_claim": "here it is!" },
        }),
    )
    .await;

    let claims =
        common::decode_claims(minted["refresh_token"]["refresh_token"].as_str().unwrap());
    assert_eq!(claims["tapis/token_type"], json!("refresh"));
    for forbidden in [
        "tapis/username",
        "tapis/account_type",
        "tapis/delegation",
        "tapis/delegation_sub",
        "tapis/target_site",
        "test_claim",
    ] {
        assert!(!claims.contains_key(forbidden), "{forbidden} leaked into the refresh token");
    }
    // the companion access claims ride along, minus exp, plus ttl
    let nested = claims["tapis/access_token"].as_object().unwrap();
    assert!(!nested.contains_key("exp"));
    assert_eq!(nested["ttl"], json!(300));
    Ok(())
}

#[tokio::test]
async fn bad_refresh_token_gives_correct_error() -> Result<()> {
    let app = common::app(false);
    let (status, _) = common::request(
        &app,
        Method::PUT,
        "/v3/tokens",
        &[],
        Some(json!({ "refresh_token": "bad" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn access_token_cannot_be_used_as_refresh_token() -> Result<()> {
    let app = common::app(false);
    let minted = mint(
        &app,
        json!({
            "token_tenant_id": "dev",
            "account_type": "user",
            "token_username": "jdoe",
        }),
    )
    .await;

    // a valid *access* token has no nested access_token claim, so the
    // refresh endpoint must reject it
    let (status, _) = common::request(
        &app,
        Method::PUT,
        "/v3/tokens",
        &[],
        Some(json!({ "refresh_token": minted["access_token"]["access_token"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
