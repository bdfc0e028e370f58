//! # ASR Billing Backend - Main Application Entry Point
//!
//! Web server that lets users spend pre-purchased credits on billable
//! transcription calls executed by a separate inference backend. The hard
//! part lives in the billing saga: reconciling the transactional credit
//! ledger with a remote call that can succeed, fail, time out or be
//! cancelled mid-flight.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state, service graph and metrics
//! - **billing**: credit ledger, model catalog, prediction history
//! - **inference**: gateway, backend families, single-flight resource cache
//! - **transcription**: the reserve/invoke/settle saga coordinator
//! - **handlers**: HTTP request handlers for the API endpoints
//! - **middleware**: request logging and metrics collection
//! - **error**: error types and their HTTP mapping

mod billing; // Credit ledger, model catalog, prediction history
mod config; // Configuration management (config.rs)
mod error; // Error handling types (error.rs)
mod handlers; // HTTP request handlers (handlers/ directory)
mod health; // Health check endpoints (health.rs)
mod inference; // Inference gateway, backends and resource cache
mod middleware; // Custom middleware (middleware/ directory)
mod state; // Application state management (state.rs)
mod transcription; // The transcription transaction saga

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, flipped by the signal handler task and polled by
/// the main task to stop the server gracefully.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting asr-billing-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (ASR backend at {})",
        config.server.host, config.server.port, config.inference.asr_base_url
    );

    // The whole service graph (ledger, catalog, gateway, coordinator) is
    // built once here and shared with every request handler.
    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/models", web::post().to(handlers::register_model))
                    .route("/users", web::post().to(handlers::create_account))
                    .route(
                        "/users/{user_id}/credits",
                        web::get().to(handlers::account_credits),
                    )
                    .route(
                        "/users/{user_id}/credits",
                        web::post().to(handlers::grant_credits),
                    )
                    .route(
                        "/users/{user_id}",
                        web::delete().to(handlers::deactivate_account),
                    )
                    .route(
                        "/predict/{model_name}/transcribe",
                        web::post().to(handlers::transcribe_audio),
                    )
                    .route(
                        "/predict/history",
                        web::get().to(handlers::prediction_history),
                    ),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish or a shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// `RUST_LOG` controls the filter; without it, crate-level debug plus
/// actix-web info is the default.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asr_billing_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag so in-flight
/// requests (and their reservations) get a chance to settle.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
