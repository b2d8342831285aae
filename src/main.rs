//! Word Rooms Back binary entrypoint wiring REST, SSE, and the room store.

use std::{env, net::SocketAddr, str::FromStr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use word_rooms_back::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::room_store::{RoomStore, memory::InMemoryRoomStore},
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

/// Room store selected with `STORE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    Memory,
    Mongo,
    Couch,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "couch" | "couchdb" => Ok(Self::Couch),
            other => bail!("unknown STORE_BACKEND `{other}` (expected memory, mongo or couch)"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let backend = env::var("STORE_BACKEND")
        .ok()
        .map(|value| value.parse::<StoreBackend>())
        .transpose()?
        .unwrap_or(StoreBackend::Memory);

    let app_state = AppState::new(AppConfig::load());
    start_store(app_state.clone(), backend).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, ?backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the in-memory store right away, or supervise a persistent backend in the background.
async fn start_store(state: SharedState, backend: StoreBackend) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match backend {
        StoreBackend::Memory => {
            warn!("using the in-memory room store; rooms are lost on restart");
            let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::with_clock(clock));
            state.set_room_store(store).await;
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use word_rooms_back::dao::{
                room_store::mongodb::{MongoConfig, MongoRoomStore},
                storage::StoreError,
            };

            tokio::spawn(storage_supervisor::run(state, move || {
                let clock = clock.clone();
                async move {
                    let config = MongoConfig::from_env().await?;
                    let store = MongoRoomStore::connect(config, clock).await?;
                    Ok::<Arc<dyn RoomStore>, StoreError>(Arc::new(store))
                }
            }));
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use word_rooms_back::dao::{
                room_store::couchdb::{CouchConfig, CouchRoomStore},
                storage::StoreError,
            };

            tokio::spawn(storage_supervisor::run(state, move || {
                let clock = clock.clone();
                async move {
                    let config = CouchConfig::from_env()?;
                    let store = CouchRoomStore::connect(config, clock).await?;
                    Ok::<Arc<dyn RoomStore>, StoreError>(Arc::new(store))
                }
            }));
        }
        #[allow(unreachable_patterns)]
        other => bail!("store backend {other:?} is not compiled into this binary"),
    }

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
