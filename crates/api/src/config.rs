//! Server configuration loaded from the environment.

use anyhow::Context;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// HMAC-SHA256 signing secret for access and refresh tokens.
    pub jwt_secret: String,
    /// Access-token lifetime in minutes.
    pub access_token_expire_minutes: i64,
    /// Refresh-token lifetime in days. Fractional values are allowed so
    /// short-lived tokens can be configured for testing.
    pub refresh_token_expire_days: f64,
    /// Interval between expired-session/refresh-token sweeps, in seconds.
    pub cleanup_interval_seconds: u64,
    /// Address the HTTP server binds to.
    pub bind_address: String,
    /// Comma-separated CORS origin allowlist.
    pub allowed_origins: String,
    /// Root directory for workflow step files.
    pub data_dir: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters");
        }

        let access_token_expire_minutes = env_parse("ACCESS_TOKEN_EXPIRE_MINUTES", 30)?;
        let refresh_token_expire_days = env_parse("REFRESH_TOKEN_EXPIRE_DAYS", 7.0)?;
        let cleanup_interval_seconds = env_parse("CLEANUP_INTERVAL_SECONDS", 3600)?;

        Ok(Self {
            database_url,
            jwt_secret,
            access_token_expire_minutes,
            refresh_token_expire_days,
            cleanup_interval_seconds,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        })
    }

    /// Refresh-token lifetime as a [`time::Duration`]. Values below one
    /// day are converted through whole minutes so fractional-day
    /// configurations produce short, precise expiries.
    pub fn refresh_token_lifetime(&self) -> time::Duration {
        if self.refresh_token_expire_days < 1.0 {
            let minutes = (self.refresh_token_expire_days * 24.0 * 60.0) as i64;
            time::Duration::minutes(minutes.max(1))
        } else {
            time::Duration::seconds((self.refresh_token_expire_days * 86_400.0) as i64)
        }
    }

    /// Access-token lifetime as a [`time::Duration`].
    pub fn access_token_lifetime(&self) -> time::Duration {
        time::Duration::minutes(self.access_token_expire_minutes)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_refresh_days(days: f64) -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            jwt_secret: "x".repeat(32),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: days,
            cleanup_interval_seconds: 3600,
            bind_address: "127.0.0.1:8000".to_string(),
            allowed_origins: String::new(),
            data_dir: "data".to_string(),
        }
    }

    #[test]
    fn whole_day_refresh_lifetime() {
        let config = config_with_refresh_days(7.0);
        assert_eq!(config.refresh_token_lifetime(), time::Duration::days(7));
    }

    #[test]
    fn fractional_day_refresh_lifetime_converts_to_minutes() {
        // 0.01 days = 14.4 minutes, floored to 14.
        let config = config_with_refresh_days(0.01);
        assert_eq!(config.refresh_token_lifetime(), time::Duration::minutes(14));
    }

    #[test]
    fn tiny_refresh_lifetime_never_rounds_to_zero() {
        let config = config_with_refresh_days(0.0001);
        assert_eq!(config.refresh_token_lifetime(), time::Duration::minutes(1));
    }

    #[test]
    fn access_lifetime_uses_minutes() {
        let config = config_with_refresh_days(7.0);
        assert_eq!(config.access_token_lifetime(), time::Duration::minutes(30));
    }
}
