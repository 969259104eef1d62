pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod ingest;
pub mod matcher;
pub mod query;
pub mod report;
pub mod server;

/// Application name for XDG paths
pub const APP_NAME: &str = "streamtally";
