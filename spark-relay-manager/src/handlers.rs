use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use spark_relay_core::{ChannelSink, ConversationTurn};

use crate::state::AppState;

/// Pending events buffered per subscriber before the relay waits on it
const SINK_BUFFER: usize = 64;

/// JSON error body returned by the gateway
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    msg: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            msg: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.status.as_u16().to_string(),
            "msg": self.msg,
        });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatStreamQuery {
    pub question: String,
}

pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Query(query): Query<ChatStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if query.question.trim().is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let stream_id = uuid::Uuid::new_v4().to_string();
    let (sink, receiver) = ChannelSink::new(SINK_BUFFER);

    if let Err(e) = state
        .relay
        .start(&query.question, &stream_id, Arc::new(sink))
        .await
    {
        // Already delivered to the subscriber as an error event.
        tracing::warn!(%stream_id, error = %e, "Relay did not start");
    }

    let idle_timeout = Duration::from_secs(state.config.gateway.sse_timeout_secs);
    let stream = receiver.into_stream(idle_timeout).map(move |event| {
        Ok(Event::default()
            .id(stream_id.clone())
            .event(event.name())
            .data(event.data()))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn get_history_handler(State(state): State<AppState>) -> Json<Vec<ConversationTurn>> {
    let turns = state.history().snapshot();
    tracing::info!(turns = turns.len(), "Fetched conversation history");
    Json(turns)
}

pub async fn del_history_handler(State(state): State<AppState>) -> StatusCode {
    state.history().clear();
    tracing::info!("Cleared conversation history");
    StatusCode::OK
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: u16,
    pub message: String,
    pub data: bool,
}

pub async fn test_connection_handler(State(state): State<AppState>) -> Json<ConnectionStatus> {
    let timeout = Duration::from_secs(state.config.spark.connect_timeout_secs);
    let connected =
        spark_relay_providers::test_connection(&state.config.spark.host_url, timeout).await;

    tracing::info!(connected, "Connection test finished");
    Json(ConnectionStatus {
        status: if connected { 200 } else { 500 },
        message: if connected {
            "connected".to_string()
        } else {
            "connection failed".to_string()
        },
        data: connected,
    })
}
