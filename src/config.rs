use std::env;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{AppError, Result};

/// Lower bound for the per-target mutation cooldown.
pub const MIN_MUTATION_COOLDOWN_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,

    // Engine
    pub session_user_id: Uuid,
    pub mutation_cooldown_ms: u64,
    pub feed_page_size: u32,
}

/// Tunables handed to the engine at construction.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub mutation_cooldown: Duration,
    pub page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mutation_cooldown: Duration::from_millis(500),
            page_size: 25,
        }
    }
}

impl EngineConfig {
    pub fn new(mutation_cooldown: Duration, page_size: u32) -> Self {
        Self {
            mutation_cooldown: mutation_cooldown
                .max(Duration::from_millis(MIN_MUTATION_COOLDOWN_MS)),
            page_size: page_size.max(1),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let session_user_id = env::var("SESSION_USER_ID")
            .map_err(|_| AppError::Configuration("SESSION_USER_ID must be set".to_string()))?
            .parse()
            .map_err(|e| AppError::Configuration(format!("SESSION_USER_ID: {}", e)))?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            session_user_id,
            mutation_cooldown_ms: env::var("MUTATION_COOLDOWN_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500)
                .max(MIN_MUTATION_COOLDOWN_MS),
            feed_page_size: env::var("FEED_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25)
                .max(1),
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig::new(
            Duration::from_millis(self.mutation_cooldown_ms),
            self.feed_page_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_clamps_cooldown_and_page_size() {
        let config = EngineConfig::new(Duration::from_millis(50), 0);
        assert_eq!(config.mutation_cooldown, Duration::from_millis(200));
        assert_eq!(config.page_size, 1);

        let config = EngineConfig::new(Duration::from_secs(2), 10);
        assert_eq!(config.mutation_cooldown, Duration::from_secs(2));
        assert_eq!(config.page_size, 10);
    }
}
