pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod ingestion;
pub mod intelligence;
pub mod metrics;
pub mod models;
pub mod services;
