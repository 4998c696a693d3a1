//! stream-monitor - multi-stream motion monitor
//!
//! Main entry point for the monitoring service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use stream_monitor::capture::FrameCapture;
use stream_monitor::event_log::EventLogStore;
use stream_monitor::hub::NotificationHub;
use stream_monitor::orchestrator::StreamOrchestrator;
use stream_monitor::recorder::RecordingSupervisor;
use stream_monitor::state::{AppConfig, AppState};
use stream_monitor::web_api;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_monitor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting stream-monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        recordings_dir = %config.recordings_dir.display(),
        logs_dir = %config.logs_dir.display(),
        sample_period_ms = config.sample_period_ms,
        "Configuration loaded"
    );

    // Durable event log, loaded once at startup
    let event_log = Arc::new(EventLogStore::open(config.logs_dir.join("event_log.json")).await?);

    // Encoder-facing services
    let supervisor = Arc::new(
        RecordingSupervisor::new(config.ffmpeg_bin.clone(), config.recordings_dir.clone()).await?,
    );
    let capture = Arc::new(
        FrameCapture::new(
            config.ffmpeg_bin.clone(),
            config.recordings_dir.clone(),
            Duration::from_secs(config.frame_grab_timeout_secs),
        )
        .await?,
    );

    let ffmpeg_available = match capture.ffmpeg_version().await {
        Some(version) => {
            tracing::info!(bin = %config.ffmpeg_bin, version = %version, "Encoder binary detected");
            true
        }
        None => {
            tracing::warn!(
                bin = %config.ffmpeg_bin,
                "Encoder binary not available, recording and sampling will fail"
            );
            false
        }
    };

    let hub = Arc::new(NotificationHub::new());
    let orchestrator = StreamOrchestrator::new(
        event_log.clone(),
        supervisor.clone(),
        capture.clone(),
        hub.clone(),
        Duration::from_millis(config.sample_period_ms),
    );

    // Periodic event log flush
    {
        let event_log = event_log.clone();
        let period = Duration::from_secs(config.log_flush_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match event_log.force_save().await {
                    Ok(true) => tracing::debug!("Periodic event log flush"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "Periodic event log flush failed"),
                }
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        event_log: event_log.clone(),
        supervisor,
        capture,
        orchestrator: orchestrator.clone(),
        hub,
        ffmpeg_available,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close recordings before the final flush so nothing races the save.
    tracing::info!("Shutting down");
    orchestrator.shutdown().await;
    if let Err(e) = event_log.force_save().await {
        tracing::error!(error = %e, "Final event log flush failed");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl_c handler installation failed");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
