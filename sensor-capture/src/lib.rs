pub mod api;
pub mod config;
pub mod ingest_endpoint;
pub mod integration_test_utils;
pub mod publisher;
pub mod router;
pub mod server;
pub mod sinks;
