pub mod api;
pub mod chain;
pub mod config;
pub mod ingest;
pub mod ingest_stats;
pub mod models;
pub mod modes;
pub mod retry;
pub mod storage;
pub mod telemetry;
