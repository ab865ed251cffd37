use std::sync::Arc;

use spark_relay_core::config::Config;
use spark_relay_core::ConversationHistory;

use crate::relay::StreamRelay;

/// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StreamRelay>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(relay: StreamRelay, config: Config) -> Self {
        Self {
            relay: Arc::new(relay),
            config: Arc::new(config),
        }
    }

    /// Build the relay from configuration as well
    pub fn from_config(config: Config) -> Self {
        let relay = StreamRelay::from_config(&config);
        Self::new(relay, config)
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        self.relay.history()
    }
}
