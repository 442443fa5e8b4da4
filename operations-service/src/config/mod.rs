use serde::Deserialize;
use service_core::config::{self as core_config, get_env, parse_env};
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub tenancy: TenancyConfig,
    pub transactions: TransactionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Role assumed for tenant-bound transactions so row-level security
    /// applies. `None` keeps the connecting role.
    pub scoped_role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret; selects HS256 when set.
    pub secret: Option<String>,
    /// RSA key pair; selects RS256 when no secret is set.
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub access_token_expiry_minutes: i64,
    pub leeway_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    /// Accept the `x-tenant-id` development header.
    pub allow_tenant_header: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    pub max_retries: u32,
    pub operation_timeout_seconds: u64,
    pub session_sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl OperationsConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let optional = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());

        let config = OperationsConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("operations-service"), is_prod)?,
            service_version: get_env(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                is_prod,
            )?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: optional("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("20"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("2"), is_prod)?,
                acquire_timeout_seconds: parse_env(
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                    Some("5"),
                    is_prod,
                )?,
                scoped_role: match optional("DB_SCOPED_ROLE") {
                    Some(role) if role.eq_ignore_ascii_case("none") => None,
                    Some(role) => Some(role),
                    None => Some("operations_app".to_string()),
                },
            },
            jwt: JwtConfig {
                secret: optional("JWT_SECRET"),
                private_key_path: optional("JWT_PRIVATE_KEY_PATH"),
                public_key_path: optional("JWT_PUBLIC_KEY_PATH"),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("60"),
                    is_prod,
                )?,
                leeway_seconds: parse_env("JWT_LEEWAY_SECONDS", Some("5"), is_prod)?,
            },
            tenancy: TenancyConfig {
                allow_tenant_header: match optional("ALLOW_TENANT_HEADER") {
                    Some(v) => v.parse().map_err(|e: std::str::ParseBoolError| {
                        AppError::ConfigError(anyhow::anyhow!("Invalid ALLOW_TENANT_HEADER: {}", e))
                    })?,
                    None => !is_prod,
                },
            },
            transactions: TransactionConfig {
                max_retries: parse_env("SEQUENCE_MAX_RETRIES", Some("3"), is_prod)?,
                operation_timeout_seconds: parse_env(
                    "DB_OPERATION_TIMEOUT_SECONDS",
                    Some("10"),
                    is_prod,
                )?,
                session_sweep_interval_seconds: parse_env(
                    "SESSION_SWEEP_INTERVAL_SECONDS",
                    Some("300"),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        let has_key_pair =
            self.jwt.private_key_path.is_some() && self.jwt.public_key_path.is_some();
        if self.jwt.secret.is_none() && !has_key_pair {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Either JWT_SECRET or JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH must be set"
            )));
        }

        if self.transactions.operation_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DB_OPERATION_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.transactions.session_sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if let Some(secret) = &self.jwt.secret {
                if secret.len() < 32 {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "JWT_SECRET must be at least 32 bytes in production"
                    )));
                }
            }

            if self.tenancy.allow_tenant_header {
                tracing::warn!("x-tenant-id header is accepted in production");
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
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

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OperationsConfig {
        OperationsConfig {
            common: core_config::Config { port: 8080 },
            environment: Environment::Dev,
            service_name: "operations-service".into(),
            service_version: "0.1.0".into(),
            log_level: "info".into(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/operations".into(),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout_seconds: 5,
                scoped_role: Some("operations_app".into()),
            },
            jwt: JwtConfig {
                secret: Some("a-development-secret-that-is-long-enough".into()),
                private_key_path: None,
                public_key_path: None,
                access_token_expiry_minutes: 60,
                leeway_seconds: 5,
            },
            tenancy: TenancyConfig {
                allow_tenant_header: true,
            },
            transactions: TransactionConfig {
                max_retries: 3,
                operation_timeout_seconds: 10,
                session_sweep_interval_seconds: 300,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".into()],
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn signing_material_is_required() {
        let mut cfg = config();
        cfg.jwt.secret = None;
        assert!(cfg.validate().is_err());

        cfg.jwt.private_key_path = Some("private.pem".into());
        cfg.jwt.public_key_path = Some("public.pem".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn production_rejects_wildcard_origin_and_short_secret() {
        let mut cfg = config();
        cfg.environment = Environment::Prod;
        cfg.security.allowed_origins = vec!["*".into()];
        assert!(cfg.validate().is_err());

        cfg.security.allowed_origins = vec!["https://app.example.com".into()];
        cfg.jwt.secret = Some("short".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }
}
