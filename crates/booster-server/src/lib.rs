//! # booster-server
//!
//! The network-facing request gateway. Validates incoming generation
//! requests against pod and model availability, hands them to the pod
//! scheduler, and delivers results by polling or SSE streaming.

pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod state;
pub mod streaming;

pub use error::ServerError;
pub use server::{create_router, run_server};
pub use state::AppState;
