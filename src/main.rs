//! Couple Quiz Back binary entrypoint wiring REST, WebSocket and session storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use couple_quiz_back::{
    config::AppConfig,
    dao::{
        catalog::{Directory, StaticCatalog},
        session_store::MemorySessionStore,
    },
    routes,
    services::{
        expiry_sweeper,
        notification::{LogNotifier, Notifier},
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let catalog = Arc::new(StaticCatalog::load(
        config.seed_path().map(|path| path.as_path()),
    ));
    let notifier = build_notifier(&config, catalog.clone());
    let sweep_interval = config.expiry_sweep_interval();

    let app_state = AppState::new(config, catalog.clone(), catalog, notifier);

    start_session_store(&app_state).await;
    if let Some(period) = sweep_interval {
        tokio::spawn(expiry_sweeper::run(app_state.clone(), period));
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the session store backend from `STORAGE_BACKEND`, defaulting to MongoDB when
/// `MONGO_URI` is set and to the in-memory store otherwise.
async fn start_session_store(state: &SharedState) {
    let mongo_uri = env::var("MONGO_URI").ok().filter(|uri| !uri.is_empty());
    let backend = env::var("STORAGE_BACKEND")
        .ok()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| {
            if mongo_uri.is_some() {
                "mongo".to_owned()
            } else {
                "memory".to_owned()
            }
        });

    #[cfg(feature = "mongo-store")]
    if backend == "mongo" {
        let uri = mongo_uri.unwrap_or_else(|| "mongodb://localhost:27017".into());
        let db_name = env::var("MONGO_DB").ok();
        info!("using MongoDB session store");
        tokio::spawn(couple_quiz_back::services::storage_supervisor::run(
            state.clone(),
            move || connect_mongo(uri.clone(), db_name.clone()),
        ));
        return;
    }

    if backend != "memory" {
        tracing::warn!(%backend, "unsupported storage backend; falling back to memory");
    }
    info!("using in-memory session store");
    state
        .install_session_store(Arc::new(MemorySessionStore::new()))
        .await;
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo(
    uri: String,
    db_name: Option<String>,
) -> Result<
    Arc<dyn couple_quiz_back::dao::session_store::SessionStore>,
    couple_quiz_back::dao::storage::StorageError,
> {
    use couple_quiz_back::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
    let store = MongoSessionStore::connect(config).await?;
    Ok(Arc::new(store))
}

/// Use the Expo push endpoint when enabled, otherwise only log notifications.
fn build_notifier(config: &AppConfig, directory: Arc<dyn Directory>) -> Arc<dyn Notifier> {
    #[cfg(feature = "expo-push")]
    if config.push().enabled {
        info!(endpoint = %config.push().endpoint, "push notifications enabled");
        return Arc::new(couple_quiz_back::services::notification::ExpoPushNotifier::new(
            config.push().endpoint.as_str(),
            directory,
        ));
    }

    let _ = (config, directory);
    info!("push notifications are logged only");
    Arc::new(LogNotifier)
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
