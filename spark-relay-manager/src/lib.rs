pub mod handlers;
pub mod relay;
pub mod server;
pub mod state;

pub use handlers::ApiError;
pub use relay::StreamRelay;
pub use server::{build_router, run_server};
pub use state::AppState;
