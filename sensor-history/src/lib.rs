pub mod api;
pub mod config;
pub mod history_endpoint;
pub mod router;
