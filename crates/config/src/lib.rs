// Configuration loading

mod server;

pub use server::{ConfigError, ServerConfig, StoreBackend, StoreConfig};
