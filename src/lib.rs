pub mod app;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod health;
pub mod history;
pub mod image;
pub mod links;
pub mod progress;
pub mod rate_limit;
pub mod session;
pub mod sink;
pub mod telegram;
pub mod telemetry;
pub mod utils;
pub mod ytdlp;
