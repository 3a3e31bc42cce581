//! HTTP surfaces for pagecast.
//!
//! - Ingestion: accepts repository URLs, stores their sources and queues a job
//! - Status: reports a job's lifecycle state
//! - Edge: serves published artifacts by subdomain

pub mod edge;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
