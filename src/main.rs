//! # Voice Relay Backend
//!
//! Takes a recorded voice clip per request, transcribes it, asks an LLM for a
//! reply with the session's earlier turns as context, and returns the reply
//! together with a URL to synthesized speech.
//!
//! ## Application Architecture:
//! - **config**: settings from defaults, `config.toml` and environment variables
//! - **services**: clients for the transcription, generation and speech providers,
//!   plus the cached fallback clip
//! - **conversation**: per-session history and the pipeline that ties the
//!   providers together
//! - **state**: shared application state and metrics
//! - **health**: health and metrics endpoints
//! - **middleware**: request logging and metrics collection
//! - **handlers**: HTTP request handlers
//! - **error**: error type returned by handlers, mapped to HTTP statuses

mod config;
mod conversation;
mod error;
mod handlers;
mod health;
mod middleware;
mod services;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    warn_missing_credentials(&config);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config)?;

    // Warm the fallback clip so the first failure doesn't wait on synthesis.
    let fallback = app_state.fallback.clone();
    tokio::spawn(async move {
        match fallback.ensure().await {
            Some(path) => info!(path = %path.display(), "Fallback audio ready"),
            None => warn!("Fallback audio could not be prepared; will retry on request"),
        }
    });

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
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .route(
                "/agent/chat/{session_id}",
                web::post().to(handlers::agent_chat),
            )
            .route("/fallback-audio", web::get().to(handlers::fallback_audio))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route(
                        "/sessions/{session_id}/history",
                        web::get().to(handlers::session_history),
                    ),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!("Could not listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls filtering; defaults to
/// `voice_relay_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn warn_missing_credentials(config: &AppConfig) {
    let keys = [
        ("ASSEMBLY_AI_API_KEY", &config.transcription.api_key),
        ("GOOGLE_API_KEY", &config.generation.api_key),
        ("MURF_API_KEY", &config.synthesis.api_key),
    ];
    for (name, key) in keys {
        if services::configured_key(key).is_none() {
            warn!("{} is not set; requests needing it will fail", name);
        }
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
