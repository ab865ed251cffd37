//! Per-question orchestration of an upstream session and its downstream sink

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use spark_relay_core::config::Config;
use spark_relay_core::stream::SinkHandle;
use spark_relay_core::{ConversationHistory, RelayEvent, RelayRegistry};
use spark_relay_providers::{
    ChatSettings, RelayError, RelayResult, SessionState, UpstreamSession, UrlSigner,
};

/// Wires signing, history, the sink registry and one upstream session
/// together for every question.
pub struct StreamRelay {
    signer: UrlSigner,
    settings: ChatSettings,
    history: Arc<ConversationHistory>,
    registry: Arc<RelayRegistry>,
    connect_timeout: Duration,
}

impl StreamRelay {
    pub fn new(
        signer: UrlSigner,
        settings: ChatSettings,
        history: Arc<ConversationHistory>,
        registry: Arc<RelayRegistry>,
    ) -> Self {
        Self {
            signer,
            settings,
            history,
            registry,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Build a relay with a fresh history and registry from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            UrlSigner::from_config(&config.spark),
            ChatSettings::from_config(&config.spark),
            Arc::new(ConversationHistory::from_config(&config.history)),
            Arc::new(RelayRegistry::new()),
        )
        .with_connect_timeout(Duration::from_secs(config.spark.connect_timeout_secs))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    /// Start relaying the answer to `question` into `sink`.
    ///
    /// Returns once the upstream session has been spawned; the returned handle
    /// resolves to the session's final state. A signing failure is pushed to
    /// the sink as an `error` event and also returned, and no upstream
    /// connection is attempted.
    pub async fn start(
        &self,
        question: &str,
        stream_id: &str,
        sink: SinkHandle,
    ) -> RelayResult<JoinHandle<SessionState>> {
        info!(%stream_id, question = %spark_relay_core::utils::truncate(question, 80), "Starting relay");

        self.registry.put(stream_id, Arc::clone(&sink));
        let prior_questions = self.history.begin_exchange(question);
        self.watch_sink(stream_id, sink);

        let signed = match self.signer.sign() {
            Ok(signed) => signed,
            Err(err) => {
                error!(%stream_id, error = %err, "Failed to sign upstream url");
                self.abort(stream_id, &err).await;
                return Err(err);
            }
        };
        debug!(%stream_id, date = %signed.date, "Signed upstream url");

        let session = UpstreamSession::new(
            stream_id,
            question,
            prior_questions,
            self.settings.clone(),
            Arc::clone(&self.history),
            Arc::clone(&self.registry),
        )
        .with_connect_timeout(self.connect_timeout);

        Ok(tokio::spawn(session.run(signed.url)))
    }

    /// Deregister the stream as soon as its sink terminates for any reason.
    fn watch_sink(&self, stream_id: &str, sink: SinkHandle) {
        let registry = Arc::clone(&self.registry);
        let stream_id = stream_id.to_string();
        tokio::spawn(async move {
            sink.closed().await;
            if registry.remove(&stream_id).is_some() {
                debug!(%stream_id, "Sink terminated, removed from registry");
            }
        });
    }

    async fn abort(&self, stream_id: &str, err: &RelayError) {
        let Some(sink) = self.registry.remove(stream_id) else {
            return;
        };
        let message = err.to_string();
        if let Err(e) = sink.emit(RelayEvent::error(message.clone())).await {
            debug!(%stream_id, error = %e, "Could not deliver signing failure");
        }
        sink.fail(&message);
    }
}
