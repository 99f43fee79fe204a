pub mod backup;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod domain;
pub mod inventory;
pub mod logger;
pub mod monitor;
pub mod optimize;
pub mod output;
pub mod progress;
pub mod task;
pub mod theme;
pub mod update;
pub mod version;
