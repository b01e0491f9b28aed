//! cronwell
//!
//! Distributed persistent task scheduler backed by PostgreSQL. Any number of
//! identical instances share one database: a leased leader turns cron
//! definitions into queue entries, and every instance claims and runs them.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod models;
pub mod pubsub;
pub mod repositories;
pub mod schema;
pub mod server;

pub use server::Server;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
