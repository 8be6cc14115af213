use snatcher_api::{app, AppState};
use snatcher_booking::{BookingServices, EngineSettings};
use snatcher_core::BookingStore;
use snatcher_store::app_config::Config;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "snatcher_api=debug,snatcher_booking=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting Snatcher API on port {}", config.server.port);

    let store = snatcher_store::connect(&config.store).await?;

    if let Some(provisioning) = &config.provisioning {
        let seats: Vec<i32> = provisioning.seat_numbers().collect();
        store
            .provision_seats(&provisioning.event_id, &provisioning.section_id, &seats)
            .await?;
    }

    let settings = EngineSettings {
        arbitration_window: config.booking.arbitration_window(),
        consistency: config.booking.consistency,
    };
    tracing::info!(
        "Arbitration window {:?} at consistency {}",
        settings.arbitration_window,
        settings.consistency
    );

    let services = BookingServices::new(store.clone(), settings);
    let app = app(AppState::from(services));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await?;
    tracing::info!("Store closed, bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
