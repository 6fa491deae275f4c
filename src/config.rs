use std::env;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use tracing::warn;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub cors_allow_origins: Vec<String>,
}

/// Where the time-series backend lives and how long we wait for it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub instant_timeout: Duration,
    pub range_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub token_ttl: Duration,
    pub admin_username: String,
    pub admin_password: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            instant_timeout: Duration::from_secs(10),
            range_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "devsecret".to_string(),
            jwt_algorithm: Algorithm::HS256,
            token_ttl: Duration::from_secs(1440 * 60),
            admin_username: "admin".to_string(),
            admin_password: "admin".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            cors_allow_origins: vec![
                "http://localhost:8501".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests need not touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GatewayConfig::default();

        let base_url = lookup("PROMETHEUS_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.backend.base_url);

        let backend = BackendConfig {
            base_url,
            instant_timeout: Duration::from_secs(parse_or(
                &lookup,
                "PROMETHEUS_INSTANT_TIMEOUT_SECS",
                defaults.backend.instant_timeout.as_secs(),
            )),
            range_timeout: Duration::from_secs(parse_or(
                &lookup,
                "PROMETHEUS_RANGE_TIMEOUT_SECS",
                defaults.backend.range_timeout.as_secs(),
            )),
        };

        let jwt_algorithm = match lookup("JWT_ALGORITHM") {
            Some(name) => match Algorithm::from_str(&name) {
                Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => alg,
                _ => {
                    warn!("Unsupported JWT_ALGORITHM {}, using HS256", name);
                    Algorithm::HS256
                }
            },
            None => defaults.auth.jwt_algorithm,
        };

        let auth = AuthConfig {
            jwt_secret: lookup("JWT_SECRET").unwrap_or(defaults.auth.jwt_secret),
            jwt_algorithm,
            token_ttl: Duration::from_secs(
                parse_or(&lookup, "ACCESS_TOKEN_EXPIRE_MINUTES", 1440u64) * 60,
            ),
            admin_username: lookup("ADMIN_USERNAME").unwrap_or(defaults.auth.admin_username),
            admin_password: lookup("ADMIN_PASSWORD").unwrap_or(defaults.auth.admin_password),
        };

        let cors_allow_origins = match lookup("CORS_ALLOW_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.cors_allow_origins,
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            backend,
            auth,
            cors_allow_origins,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value {:?} for {}, using {}", raw, key, default);
            default
        }),
        None => default,
    }
}
