use axum::{
    http::HeaderValue,
    routing::{delete, get},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    chat_stream_handler, del_history_handler, get_history_handler, test_connection_handler,
};
use crate::state::AppState;

/// Gateway routes, mounted under `/SparkAPI`
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);

    let api = Router::new()
        .route("/chatStream", get(chat_stream_handler))
        .route("/getHistory", get(get_history_handler))
        .route("/delHistory", delete(del_history_handler))
        .route("/testConnection", get(test_connection_handler));

    Router::new()
        .nest("/SparkAPI", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn run_server<F>(state: AppState, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Server shutting down signal received");
        })
        .await?;

    Ok(())
}
