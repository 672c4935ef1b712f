use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::kernel::rooms::RoomAccess;
use crate::server::middleware::RateLimitSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; without it resources live in memory.
    pub database_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub allowed_origins: Vec<String>,
    pub room_access: RoomAccess,
    /// Catalog JSON; the built-in budget catalog when unset.
    pub resource_catalog_path: Option<PathBuf>,
    pub rate_limit: RateLimitSettings,
    pub app_env: String,
    pub soft_delete_retention_days: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: get("DATABASE_URL"),
            port: parse_or(&get, "PORT", 8080)?,
            jwt_secret: get("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: get("JWT_ISSUER").unwrap_or_else(|| "kamu".to_string()),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["*".to_string()]),
            room_access: parse_or(&get, "ROOM_ACCESS", RoomAccess::TokenRequired)?,
            resource_catalog_path: get("RESOURCE_CATALOG_PATH").map(PathBuf::from),
            rate_limit: RateLimitSettings {
                per_second: parse_or(&get, "RATE_LIMIT_PER_SECOND", 10)?,
                burst_size: parse_or(&get, "RATE_LIMIT_BURST", 20)?,
            },
            app_env: get("APP_ENV").unwrap_or_else(|| "development".to_string()),
            soft_delete_retention_days: retention_days(parse_or(
                &get,
                "SOFT_DELETE_RETENTION_DAYS",
                30,
            )?)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn soft_delete_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.soft_delete_retention_days)
    }
}

/// Longest accepted soft-delete retention, about a century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

fn retention_days(days: i64) -> Result<i64> {
    if !(0..=MAX_RETENTION_DAYS).contains(&days) {
        anyhow::bail!(
            "SOFT_DELETE_RETENTION_DAYS must be between 0 and {} (got {})",
            MAX_RETENTION_DAYS,
            days
        );
    }
    Ok(days)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid ('{}'): {}", key, raw, e)),
    }
}
