use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shieldfeed::auth::{DeviceAuthenticator, TicketAuthenticator};
use shieldfeed::config::Config;
use shieldfeed::feed::Feed;
use shieldfeed::kv::{KeyValueStore, MemoryStore, RedisStore};
use shieldfeed::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let kv: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .expect("failed to connect to Redis");
            tracing::info!("using Redis metadata store");
            Arc::new(store)
        }
        None => {
            tracing::info!("REDIS_URL unset; using in-memory metadata store");
            Arc::new(MemoryStore::new())
        }
    };

    let feed = Arc::new(Feed::new(kv.clone()));
    feed.start();

    let auth: Arc<dyn DeviceAuthenticator> = Arc::new(TicketAuthenticator::new(kv));

    let state = AppState {
        feed: feed.clone(),
        auth,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(shieldfeed::feed::server::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "shieldfeed listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    feed.stop().await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
