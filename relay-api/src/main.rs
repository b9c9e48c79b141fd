use std::sync::Arc;

use axum::{routing, Router};
use envconfig::Envconfig;
use eyre::Result;
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use relay_api::config::Config;
use relay_api::handlers::{self, webhook::WebhookState};
use relay_common::metrics::setup_metrics_recorder;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout with a level configured by the RUST_LOG envvar (default=INFO)
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let relay = config.build_relay()?;
    let state = WebhookState::new(Arc::new(relay), config.verify_token.as_str());

    let app = handlers::add_routes(Router::new(), state, config.max_body_size);
    let app = if config.export_prometheus {
        let recorder_handle = setup_metrics_recorder()?;
        app.route(
            "/metrics",
            routing::get(move || std::future::ready(recorder_handle.render())),
        )
    } else {
        app
    };

    listen(app, config.bind()).await
}
