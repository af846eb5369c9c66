pub mod app_context;
pub mod config;
pub mod consumer;
pub mod processor;
