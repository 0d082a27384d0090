pub mod config;
pub mod error;
pub mod features;
pub mod fetch;
pub mod http_client;
pub mod model;
pub mod opendota;
pub mod pipeline;
pub mod player_id;
pub mod prep;
pub mod rate_limit;
pub mod sheets;
pub mod stratz;
pub mod table_io;
pub mod team_cache;

use tracing_subscriber::EnvFilter;

/// Loads `.env.local` then `.env`, and installs the log subscriber
/// (`RUST_LOG` overrides the default `info` filter).
pub fn init_runtime() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
