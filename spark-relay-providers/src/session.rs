//! One upstream WebSocket conversation per question
//!
//! The session owns the socket for its whole life, translates inbound frames
//! into relay events for the registered sink, and delivers exactly one
//! terminal event. The sink may disappear at any point; pushing to a stream
//! that is no longer registered is a silent no-op.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use spark_relay_core::{ConversationHistory, RelayEvent, RelayRegistry};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::protocol::{ChatSettings, RequestFrame, ResponseFrame, TokenUsage};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const UID_LEN: usize = 10;

/// Lifecycle of an upstream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connecting,
    Open,
    Streaming,
    /// The reply finished normally
    Completed,
    /// A protocol, transport or decode error ended the session
    Failed,
    /// The upstream went away early, or the subscriber detached
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Closed
        )
    }
}

enum FrameOutcome {
    Continue,
    Finished(Option<TokenUsage>),
    Failed(RelayError),
}

/// State carried by one upstream conversation
pub struct UpstreamSession {
    stream_id: String,
    question: String,
    prior_questions: Vec<String>,
    settings: ChatSettings,
    history: Arc<ConversationHistory>,
    registry: Arc<RelayRegistry>,
    connect_timeout: Duration,
    state: SessionState,
}

impl UpstreamSession {
    pub fn new(
        stream_id: impl Into<String>,
        question: impl Into<String>,
        prior_questions: Vec<String>,
        settings: ChatSettings,
        history: Arc<ConversationHistory>,
        registry: Arc<RelayRegistry>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            question: question.into(),
            prior_questions,
            settings,
            history,
            registry,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            state: SessionState::Created,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Drive the session to a terminal state and return it.
    pub async fn run(mut self, url: Url) -> SessionState {
        let Some(sink) = self.registry.get(&self.stream_id) else {
            info!(stream_id = %self.stream_id, "Sink gone before upstream connect, skipping session");
            self.transition(SessionState::Closed);
            return self.state;
        };

        self.transition(SessionState::Connecting);
        let connect = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()));
        let ws_stream = tokio::select! {
            connected = connect => match connected {
                Ok(Ok((ws_stream, _))) => ws_stream,
                Ok(Err(e)) => return self.fail(e.into()).await,
                Err(_) => {
                    return self
                        .fail(RelayError::Transport(format!(
                            "timed out after {:?} connecting to upstream",
                            self.connect_timeout
                        )))
                        .await;
                }
            },
            _ = sink.closed() => return self.detach(),
        };

        self.transition(SessionState::Open);
        let (mut write, mut read) = ws_stream.split();

        let request = RequestFrame::new(
            &self.settings,
            &new_uid(),
            &self.prior_questions,
            &self.question,
        );
        let request_text = match serde_json::to_string(&request) {
            Ok(text) => text,
            Err(e) => {
                close_upstream(&mut write).await;
                return self
                    .fail(RelayError::Transport(format!("failed to encode request: {}", e)))
                    .await;
            }
        };
        if let Err(e) = write.send(WsMessage::Text(request_text)).await {
            return self.fail(e.into()).await;
        }

        self.transition(SessionState::Streaming);
        loop {
            tokio::select! {
                inbound = read.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => match self.handle_frame(&text).await {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Finished(usage) => {
                            close_upstream(&mut write).await;
                            return self.complete(usage).await;
                        }
                        FrameOutcome::Failed(err) => {
                            close_upstream(&mut write).await;
                            return self.fail(err).await;
                        }
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            return self.fail(e.into()).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(stream_id = %self.stream_id, ?frame, "Upstream sent close frame");
                        return self.upstream_closed().await;
                    }
                    None => return self.upstream_closed().await,
                    Some(Err(e)) => return self.fail(e.into()).await,
                    Some(Ok(other)) => {
                        debug!(stream_id = %self.stream_id, ?other, "Ignoring non-text upstream message");
                    }
                },
                _ = sink.closed() => {
                    close_upstream(&mut write).await;
                    return self.detach();
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) -> FrameOutcome {
        let frame = match ResponseFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => return FrameOutcome::Failed(e),
        };
        if let Some(err) = frame.error() {
            return FrameOutcome::Failed(err);
        }

        debug!(
            stream_id = %self.stream_id,
            sid = %frame.header.sid,
            status = frame.header.status,
            "Upstream frame"
        );
        for chunk in frame.chunks() {
            self.forward_chunk(chunk).await;
        }

        if frame.is_last() {
            FrameOutcome::Finished(frame.usage())
        } else {
            FrameOutcome::Continue
        }
    }

    async fn forward_chunk(&self, content: &str) {
        self.history.append_delta(content);

        let Some(sink) = self.registry.get(&self.stream_id) else {
            debug!(stream_id = %self.stream_id, "Sink gone, dropping chunk");
            return;
        };
        if let Err(e) = sink.emit(RelayEvent::message(content)).await {
            warn!(stream_id = %self.stream_id, error = %e, "Failed to push chunk, detaching sink");
            if let Some(sink) = self.registry.remove(&self.stream_id) {
                sink.fail(&e.to_string());
            }
        }
    }

    async fn complete(&mut self, usage: Option<TokenUsage>) -> SessionState {
        let usage = usage.unwrap_or_default();
        info!(
            stream_id = %self.stream_id,
            question_tokens = usage.question_tokens,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Upstream reply completed"
        );
        self.transition(SessionState::Completed);
        self.deliver_terminal(RelayEvent::Complete).await;
        self.state
    }

    async fn fail(&mut self, err: RelayError) -> SessionState {
        error!(stream_id = %self.stream_id, error = %err, "Upstream session failed");
        self.transition(SessionState::Failed);
        self.deliver_terminal(RelayEvent::error(err.to_string())).await;
        self.state
    }

    async fn upstream_closed(&mut self) -> SessionState {
        let err = RelayError::Transport("upstream closed the connection before completion".to_string());
        warn!(stream_id = %self.stream_id, "Upstream closed before the reply completed");
        self.transition(SessionState::Closed);
        self.deliver_terminal(RelayEvent::error(err.to_string())).await;
        self.state
    }

    fn detach(&mut self) -> SessionState {
        info!(stream_id = %self.stream_id, "Sink terminated, closing upstream session");
        self.registry.remove(&self.stream_id);
        self.transition(SessionState::Closed);
        self.state
    }

    /// Push the terminal event if this session still owns the registration.
    async fn deliver_terminal(&self, event: RelayEvent) {
        let Some(sink) = self.registry.remove(&self.stream_id) else {
            debug!(stream_id = %self.stream_id, "Sink already deregistered, dropping terminal event");
            return;
        };

        let failure = match &event {
            RelayEvent::Error { message } => Some(message.clone()),
            _ => None,
        };
        if let Err(e) = sink.emit(event).await {
            warn!(stream_id = %self.stream_id, error = %e, "Failed to push terminal event");
        }
        match failure {
            Some(message) => sink.fail(&message),
            None => sink.complete(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(stream_id = %self.stream_id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }
}

async fn close_upstream(write: &mut WsWrite) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Cow::Borrowed(""),
    };
    if let Err(e) = write.send(WsMessage::Close(Some(frame))).await {
        debug!(error = %e, "Upstream close handshake failed");
    }
}

fn new_uid() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(UID_LEN)
        .collect()
}
