//! Registry of live downstream sinks, keyed by stream id

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::sink::SinkHandle;

/// Maps stream ids to the sinks still accepting events.
///
/// A missing id is a normal state: the subscriber may already be gone.
#[derive(Default)]
pub struct RelayRegistry {
    sinks: RwLock<HashMap<String, SinkHandle>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink, returning the sink previously held under the same id
    pub fn put(&self, stream_id: impl Into<String>, sink: SinkHandle) -> Option<SinkHandle> {
        let stream_id = stream_id.into();
        debug!(%stream_id, "Registering sink");
        self.sinks.write().insert(stream_id, sink)
    }

    pub fn get(&self, stream_id: &str) -> Option<SinkHandle> {
        self.sinks.read().get(stream_id).cloned()
    }

    /// Remove a sink. Only the first caller for a given registration gets it back.
    pub fn remove(&self, stream_id: &str) -> Option<SinkHandle> {
        let removed = self.sinks.write().remove(stream_id);
        if removed.is_some() {
            debug!(%stream_id, "Deregistered sink");
        }
        removed
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.sinks.read().contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }
}

impl std::fmt::Debug for RelayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks = self.sinks.read();
        let mut ids: Vec<&String> = sinks.keys().collect();
        ids.sort();
        f.debug_struct("RelayRegistry").field("streams", &ids).finish()
    }
}
