//! Upstream chat model dialect for spark-relay
//!
//! This crate knows how to sign the upstream connection URL, speak the
//! JSON-over-WebSocket chat protocol, and drive one upstream session per
//! question.

pub mod connectivity;
pub mod error;
pub mod protocol;
pub mod session;
pub mod signer;

pub use connectivity::test_connection;
pub use error::{RelayError, RelayResult};
pub use protocol::{ChatSettings, RequestFrame, ResponseFrame, TokenUsage};
pub use session::{SessionState, UpstreamSession};
pub use signer::{SignedUpstreamRequest, UrlSigner};
