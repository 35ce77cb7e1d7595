mod api;
mod cache;
mod config;
mod db;
mod error;
mod provider;
mod scheduler;
mod settlement;
mod telemetry;
mod types;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::cache::OddsRefresher;
use crate::config::Config;
use crate::error::Result;
use crate::provider::FootballApi;
use crate::scheduler::JobRunner;
use crate::telemetry::Telemetry;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let api = FootballApi::new(&cfg)?;
    let telemetry = Telemetry::new();

    // --- Background tasks ---

    // Durable one-shot jobs (settlements scheduled by cache refreshes)
    let runner = JobRunner::new(cfg.clone(), pool.clone(), api.clone());
    tokio::spawn(async move { runner.run().await });

    // Periodic odds cache refresh per enabled competition
    let refresher = OddsRefresher::new(cfg.clone(), pool.clone(), api.clone());
    tokio::spawn(async move { refresher.run().await });

    // --- HTTP API server ---
    let state = ApiState {
        cfg: cfg.clone(),
        pool,
        api,
        http: reqwest::Client::new(),
        telemetry,
    };
    let app = router(state).layer(cors_layer(&cfg));

    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_layer(cfg: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if cfg.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
