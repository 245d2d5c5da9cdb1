//! Server settings of the API service
//!
//! Loaded from `API_`-prefixed environment variables:
//! - `API_BIND_ADDR`: listen address (default: "0.0.0.0:3001")
//! - `API_STORE_BACKEND`: `postgres` or `memory` (default: "postgres")

use ::config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Document store backing the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub store_backend: StoreBackend,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("bind_addr", "0.0.0.0:3001")?
            .set_default("store_backend", "postgres")?
            .add_source(Environment::with_prefix("API"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_server_config_defaults() {
        unsafe {
            std::env::remove_var("API_BIND_ADDR");
            std::env::remove_var("API_STORE_BACKEND");
        }
        let config = ServerConfig::from_env().expect("defaults load");
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.store_backend, StoreBackend::Postgres);
    }

    #[test]
    #[serial]
    fn test_server_config_from_env() {
        unsafe {
            std::env::set_var("API_BIND_ADDR", "127.0.0.1:8080");
            std::env::set_var("API_STORE_BACKEND", "memory");
        }
        let config = ServerConfig::from_env().expect("environment loads");
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.store_backend, StoreBackend::Memory);

        unsafe {
            std::env::remove_var("API_BIND_ADDR");
            std::env::remove_var("API_STORE_BACKEND");
        }
    }
}
