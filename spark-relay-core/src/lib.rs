//! Core types and shared state for spark-relay
//!
//! This crate provides the configuration, logging, conversation history
//! and stream plumbing used by all other spark-relay components.

pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod stream;
pub mod utils;

pub use error::{Error, Result};
pub use history::{ConversationHistory, ConversationTurn, Role};
pub use stream::{ChannelSink, EventSink, RelayEvent, RelayRegistry, SinkReceiver};
