mod app;
pub mod audio;
pub mod commands;
pub mod config;
pub mod connection;
pub mod media;
pub mod outbound;
pub mod transport;

pub use app::RelayApp;
pub use config::{ConfigError, RelayConfig};
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
