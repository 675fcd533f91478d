//! Command line utility for creating the public/private key pairs assigned
//! to tenants for signing JWTs on a new site.
//!
//! Runs with the Tokens API config and acts as the `tokens` principal. The
//! config must have `use_sk` disabled so startup does not try to fetch
//! signing keys that may not exist yet; the SK is still called directly to
//! generate them. Set `ACTUALLY_RUN_UPDATES=true` to apply changes; the
//! default is a validate-and-exit dry run.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use tokens_api_rust::config::AppConfig;
use tokens_api_rust::services::{bootstrap, AppState};

#[derive(Parser)]
#[command(name = "keysmgt")]
#[command(about = "Create and publish tenant signing key pairs for a site")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Generate key pairs in the SK and publish the public keys to the Tenants registry")]
    PrimarySite,

    #[command(about = "Generate key pairs in the SK and write the public keys under DATA_DIR")]
    AssociateSite,

    #[command(about = "Publish previously materialized associate-site public keys to the registry")]
    UpdateAssociatePubKeys,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));

    let state = bootstrap::init(config).await.context("bootstrap failed")?;
    validate_config(&state, &cli.command, &data_dir).await?;

    let actually_run = std::env::var("ACTUALLY_RUN_UPDATES")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !actually_run {
        println!("config was valid. ACTUALLY_RUN_UPDATES was false so exiting...");
        return Ok(());
    }
    println!("config was valid and ACTUALLY_RUN_UPDATES was true, so starting the updates...");

    match cli.command {
        Commands::PrimarySite => create_keys_for_primary_site(&state).await,
        Commands::AssociateSite => create_keys_for_associate_site(&state, &data_dir).await,
        Commands::UpdateAssociatePubKeys => {
            update_associate_site_pub_keys(&state, &data_dir).await
        }
    }
}

/// Refuse to run with a config that could not work: this program must act as
/// the tokens service, must not have tried to fetch keys at startup, and
/// every configured tenant must exist and be owned by the configured site.
async fn validate_config(state: &AppState, command: &Commands, data_dir: &PathBuf) -> Result<()> {
    let config = &state.config;
    if config.service.service_name != "tokens" {
        bail!(
            "Invalid config: service_name must be 'tokens', not {}. \
             This program must run as the Tokens API to interact with the SK.",
            config.service.service_name
        );
    }
    if config.sk.use_sk {
        bail!(
            "Invalid config: use_sk must be false so that startup does not try to \
             retrieve private keys from the SK (they may not exist yet)."
        );
    }
    if config.dev.site_admin_privatekey.trim().is_empty() {
        bail!("Invalid config: the site-admin tenant private key is required.");
    }
    if config.service.tenants.is_empty() {
        bail!("Invalid config: no tenants configured.");
    }

    let records = state
        .registry
        .list_tenants()
        .await
        .context("listing tenants from the registry")?;
    for tn in &config.service.tenants {
        let record = records
            .iter()
            .find(|r| &r.tenant_id == tn)
            .with_context(|| format!("Invalid tenant {tn} configured: tenant not found"))?;
        if record.site_id != config.service.service_site_id {
            bail!(
                "Invalid tenant '{}' configured: tenant owned by {}, not by the configured site ({}).",
                tn,
                record.site_id,
                config.service.service_site_id
            );
        }
    }

    if let Commands::UpdateAssociatePubKeys = command {
        for tn in &config.service.tenants {
            let pub_key_path = data_dir.join(tn).join("pub.key");
            if !pub_key_path.is_file() {
                bail!(
                    "Did not find a public key for tenant {}. Expected a file at {}.",
                    tn,
                    pub_key_path.display()
                );
            }
        }
    }

    let has_role = state
        .sk
        .has_role(
            "tenant_definition_updater",
            &config.service.service_name,
            &config.service.service_tenant_id,
        )
        .await
        .context("checking the tenant_definition_updater role with the SK")?;
    if !has_role {
        bail!("The tokens user does not hold the tenant_definition_updater role.");
    }
    println!("tokens user has the necessary role.");
    Ok(())
}

/// Ask the SK to generate a fresh key pair for one tenant and read it back.
async fn create_keys_for_tenant(state: &AppState, tenant_id: &str) -> Result<(String, String)> {
    println!("generating keys for tenant {tenant_id}");
    state
        .sk
        .write_secret(
            "jwtsigning",
            "keys",
            tenant_id,
            &state.config.service.service_name,
            json!({ "privateKey": "<generate-secret>" }),
        )
        .await
        .with_context(|| format!("generating a key pair in the SK for tenant {tenant_id}"))?;
    let secret = state
        .sk
        .read_secret(
            "jwtsigning",
            "keys",
            tenant_id,
            &state.config.service.service_name,
        )
        .await
        .with_context(|| format!("reading the key pair back for tenant {tenant_id}"))?;
    match (secret.private_key, secret.public_key) {
        (Some(private_key), Some(public_key)) => Ok((private_key, public_key)),
        _ => bail!("SK returned an incomplete key pair for tenant {tenant_id}"),
    }
}

async fn update_tenant_pub_key(state: &AppState, tenant_id: &str, pub_key: &str) -> Result<()> {
    state
        .registry
        .update_tenant(tenant_id, pub_key)
        .await
        .with_context(|| format!("updating the public key for tenant {tenant_id}"))?;
    println!("public key updated for tenant {tenant_id}.");
    Ok(())
}

/// Primary site: private keys stay in the SK, public keys go straight to the
/// Tenants registry.
async fn create_keys_for_primary_site(state: &AppState) -> Result<()> {
    for tn in &state.config.service.tenants {
        let (_priv_key, pub_key) = create_keys_for_tenant(state, tn).await?;
        update_tenant_pub_key(state, tn, &pub_key).await?;
    }
    Ok(())
}

/// Associate site: no registry access from here, so public keys are written
/// to files an operator ships to the primary site.
async fn create_keys_for_associate_site(state: &AppState, data_dir: &PathBuf) -> Result<()> {
    for tn in &state.config.service.tenants {
        let (_priv_key, pub_key) = create_keys_for_tenant(state, tn).await?;
        let tenant_dir = data_dir.join(tn);
        std::fs::create_dir_all(&tenant_dir)
            .with_context(|| format!("creating {}", tenant_dir.display()))?;
        let pub_key_path = tenant_dir.join("pub.key");
        std::fs::write(&pub_key_path, &pub_key)
            .with_context(|| format!("writing {}", pub_key_path.display()))?;
        println!("public key for tenant {} written to {}.", tn, pub_key_path.display());
    }
    Ok(())
}

/// Primary site, on behalf of an associate site: publish the materialized
/// public keys to the registry.
async fn update_associate_site_pub_keys(state: &AppState, data_dir: &PathBuf) -> Result<()> {
    for tn in &state.config.service.tenants {
        let pub_key_path = data_dir.join(tn).join("pub.key");
        let pub_key = std::fs::read_to_string(&pub_key_path)
            .with_context(|| format!("reading {}", pub_key_path.display()))?;
        update_tenant_pub_key(state, tn, &pub_key).await?;
    }
    Ok(())
}
