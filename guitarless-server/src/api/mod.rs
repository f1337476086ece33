//! HTTP API handlers for guitarless-server
//!
//! JSON + multipart job submission, SSE progress, health.

pub mod health;
pub mod process;
pub mod progress;

pub use health::health_routes;
pub use process::{process_routes, ProcessRequest, ProcessResponse};
pub use progress::progress_routes;
