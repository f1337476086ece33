//! # Guitarless Common Library
//!
//! Shared code for the Guitarless service crates:
//! - Progress events and the subscriber registry that broadcasts them
//! - Server-Sent Events plumbing for progress observers
//! - TOML configuration loading and root folder resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
pub use events::{Broadcaster, ProgressEvent, Severity, Subscriber};
