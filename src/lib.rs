pub mod config;
pub mod core;
pub mod proxy;

// Re-export commonly used items for convenience
pub use config::{AppConfig, ConfigError, ConfigResult};
pub use core::*;
pub use proxy::{ProxyError, ProxyResult, ProxyState};
