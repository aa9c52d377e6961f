//! provision-core: Shared infrastructure for the bank provisioning tools.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use mongodb;
pub use tokio;
pub use tracing;
