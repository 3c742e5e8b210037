//! Relay HTTP entrypoint.
//!
//! Launches an Axum server that accepts signed meta-transactions and submits them
//! to the engine as this server's relayer identity.
//!
//! Endpoints:
//! - `POST /execute`, `POST /execute/batch` - submit signed calls
//! - `POST /deploy`, `POST /deploy/meta` - deploy a principal's wallet
//! - `GET /nonce/{principal}`, `GET /wallet/{principal}` - per-principal state
//! - `GET /domain`, `POST /digest/*` - signing helpers
//! - `GET /status`, `GET /health`
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON config file (default `config.json`)
//! - `RUST_LOG` sets the log filter, `OTEL_*` enables trace export with the `telemetry` feature

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use metatx_relay::config::Config;
use metatx_relay::handlers;
use metatx_relay::service::RelayService;
use metatx_relay::util::{SigDown, Telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let service = RelayService::from_config(&config)?;
    tracing::info!(
        account = %service.engine().account(),
        relayer = %service.relayer(),
        chain_id = config.domain().chain_id,
        "engine ready"
    );
    let axum_state = Arc::new(service);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
