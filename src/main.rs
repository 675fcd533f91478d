use anyhow::Context;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tokens_api_rust::config::AppConfig;
use tokens_api_rust::handlers;
use tokens_api_rust::services::bootstrap;

#[tokio::main]
async fn main() {
    // A failed bootstrap must kill the process: serving requests against a
    // half-built tenant cache is worse than not serving at all.
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let port = config.service.port;

    let state = bootstrap::init(config).await.context("bootstrap failed")?;

    let app = handlers::build_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding 0.0.0.0:{port}"))?;
    tracing::info!("Tokens API listening on http://0.0.0.0:{port}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
