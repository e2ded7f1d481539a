pub mod auth;
pub mod error;
pub mod holidays;
pub mod lifecycle;
pub mod models;
pub mod openapi;
pub mod orders;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod telemetry;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
