use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use validator::Validate;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub retention: RetentionConfig,
    pub access_platform: Option<AccessPlatformConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for any single store operation.
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_session_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Revoke every descendant of a refresh token that is presented again
    /// after it was rotated.
    pub revoke_lineage_on_reuse: bool,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub revoked_retention_days: f64,
    pub audit_retention_days: f64,
    /// 0 disables the in-process schedule.
    pub prune_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AccessPlatformConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: SecretString,
    pub timeout_seconds: u64,
}

/// Admin account seeded by the `bootstrap-admin` entry point.
#[derive(Clone, Validate)]
pub struct AdminBootstrapConfig {
    #[validate(email(message = "ADMIN_EMAIL must be a valid email"))]
    pub email: String,
    #[validate(length(min = 8, message = "ADMIN_PASSWORD must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "ADMIN_NAME must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "ADMIN_ROLE must not be empty"))]
    pub role: String,
    pub protected: bool,
}

impl std::fmt::Debug for AdminBootstrapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminBootstrapConfig")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("protected", &self.protected)
            .finish()
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment = Environment::from_env()?;
        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-auth"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig::from_env(is_prod)?,
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                issuer: get_env("JWT_ISSUER", Some("access-auth"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_session_ttl_days: parse_env("REFRESH_SESSION_TTL_DAYS", Some("7"), is_prod)?,
            },
            session: SessionConfig {
                revoke_lineage_on_reuse: parse_bool(&get_env(
                    "REVOKE_LINEAGE_ON_REUSE",
                    Some("true"),
                    is_prod,
                )?)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            retention: RetentionConfig::from_env(is_prod)?,
            access_platform: AccessPlatformConfig::from_env(is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.expose_secret().len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 bytes"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_session_ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_SESSION_TTL_DAYS must be positive"
            )));
        }

        if self.jwt.access_token_expiry_minutes >= self.jwt.refresh_session_ttl_days * 24 * 60 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Access token lifetime must be shorter than the refresh session lifetime"
            )));
        }

        self.database.validate()?;
        self.retention.validate()?;

        Ok(())
    }
}

impl Environment {
    pub fn from_env() -> Result<Self, AppError> {
        env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))
    }
}

impl DatabaseConfig {
    pub fn from_env(is_prod: bool) -> Result<Self, AppError> {
        let config = DatabaseConfig {
            url: get_env("DATABASE_URL", None, is_prod)?,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
            min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            store_timeout_ms: parse_env("STORE_TIMEOUT_MS", Some("5000"), is_prod)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.store_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_TIMEOUT_MS must be positive"
            )));
        }
        if self.min_connections > self.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }
        Ok(())
    }
}

impl RetentionConfig {
    pub fn from_env(is_prod: bool) -> Result<Self, AppError> {
        Ok(RetentionConfig {
            revoked_retention_days: parse_env(
                "REFRESH_REVOKED_RETENTION_DAYS",
                Some("30"),
                is_prod,
            )?,
            audit_retention_days: parse_env("SESSION_AUDIT_RETENTION_DAYS", Some("90"), is_prod)?,
            prune_interval_seconds: parse_env("PRUNE_INTERVAL_SECONDS", Some("3600"), is_prod)?,
        })
    }

    fn validate(&self) -> Result<(), AppError> {
        for (key, days) in [
            ("REFRESH_REVOKED_RETENTION_DAYS", self.revoked_retention_days),
            ("SESSION_AUDIT_RETENTION_DAYS", self.audit_retention_days),
        ] {
            if !days.is_finite() || days < 0.0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be a non-negative number, got {}",
                    key,
                    days
                )));
            }
        }
        Ok(())
    }
}

impl AccessPlatformConfig {
    /// Present only when `ACCESS_PLATFORM_BASE_URL` is set.
    pub fn from_env(is_prod: bool) -> Result<Option<Self>, AppError> {
        let base_url = match env::var("ACCESS_PLATFORM_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };

        let app_key = get_env("ACCESS_PLATFORM_APP_KEY", None, true)?;
        let app_secret = get_env("ACCESS_PLATFORM_APP_SECRET", None, true)?;
        if app_key.is_empty() || app_secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_PLATFORM_APP_KEY and ACCESS_PLATFORM_APP_SECRET must not be empty"
            )));
        }

        Ok(Some(AccessPlatformConfig {
            base_url,
            app_key,
            app_secret: SecretString::new(app_secret),
            timeout_seconds: parse_env("ACCESS_PLATFORM_TIMEOUT_SECONDS", Some("10"), is_prod)?,
        }))
    }
}

impl AdminBootstrapConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let config = AdminBootstrapConfig {
            email: get_env("ADMIN_EMAIL", None, false)?,
            password: get_env("ADMIN_PASSWORD", None, false)?,
            name: get_env("ADMIN_NAME", Some("Admin"), false)?,
            role: get_env("ADMIN_ROLE", Some("ADMIN"), false)?,
            protected: parse_bool(&get_env("ADMIN_PROTECTED", Some("false"), false)?)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(format!("Invalid boolean: {}", other)),
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
