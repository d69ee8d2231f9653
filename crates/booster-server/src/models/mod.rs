//! Request and response types for the gateway API.

pub mod generate;
pub mod status;
pub mod streaming;

pub use generate::{GenerateAccepted, GenerateRequest};
pub use status::RequestStatusResponse;
pub use streaming::{StreamChunk, StreamEnd};
