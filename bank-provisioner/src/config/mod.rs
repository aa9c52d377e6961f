use crate::models::plan::{
    DEFAULT_ADMIN_USER, DEFAULT_COLLECTIONS, DEFAULT_DATABASE, DEFAULT_ROLE, DEFAULT_ROLE_DB,
    DEFAULT_UNIQUE_INDEX,
};
use crate::models::{IndexSpec, ProvisionPlan, RoleGrant, UserSpec};
use provision_core::config as core_config;
use provision_core::error::AppError;
use provision_core::retry::RetryConfig;
use secrecy::Secret;
use std::env;
use std::time::Duration;

/// Matches the context timeout the bank services use against MongoDB.
const DEFAULT_CONNECT_TIMEOUT_SECS: &str = "60";
const DEFAULT_MAX_RETRIES: &str = "3";

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub plan: ProvisionPlan,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub root_user: Option<String>,
    pub root_password: Option<Secret<String>>,
    pub connect_timeout: Duration,
}

impl ProvisionerConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_common(common_config)
    }

    /// Read tool settings from the process environment on top of an already
    /// loaded common config.
    pub fn from_common(common: core_config::Config) -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build the config from any key lookup. Every `PROVISION_*` setting has a
    /// default except the admin password; in production no default applies.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_prod = common.is_prod()
            || lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()) == "prod";
        let get = |key: &str, default: Option<&str>| get_env(&lookup, key, default, is_prod);

        let root_user = lookup("MONGODB_ROOT_USER").filter(|v| !v.is_empty());
        let root_password = lookup("MONGODB_ROOT_PASSWORD").map(Secret::new);
        if root_user.is_some() && root_password.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MONGODB_ROOT_PASSWORD is required when MONGODB_ROOT_USER is set"
            )));
        }

        let mongodb = MongoConfig {
            uri: Secret::new(get("MONGODB_URI", None)?),
            root_user,
            root_password,
            connect_timeout: Duration::from_secs(parse(
                "MONGODB_CONNECT_TIMEOUT_SECS",
                &get("MONGODB_CONNECT_TIMEOUT_SECS", Some(DEFAULT_CONNECT_TIMEOUT_SECS))?,
            )?),
        };

        let default_collections = DEFAULT_COLLECTIONS.join(",");
        let collections = get("PROVISION_COLLECTIONS", Some(default_collections.as_str()))?
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        let unique_index_enabled: bool = parse(
            "PROVISION_UNIQUE_INDEX_ENABLED",
            &get("PROVISION_UNIQUE_INDEX_ENABLED", Some("true"))?,
        )?;
        let unique_index = if unique_index_enabled {
            Some(
                get("PROVISION_UNIQUE_INDEX", Some(DEFAULT_UNIQUE_INDEX))?
                    .parse::<IndexSpec>()
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            )
        } else {
            None
        };

        let plan = ProvisionPlan {
            database: get("PROVISION_DATABASE", Some(DEFAULT_DATABASE))?,
            admin_user: UserSpec::new(
                get("PROVISION_ADMIN_USER", Some(DEFAULT_ADMIN_USER))?,
                Secret::new(get("PROVISION_ADMIN_PASSWORD", None)?),
                vec![RoleGrant::new(
                    get("PROVISION_ADMIN_ROLE", Some(DEFAULT_ROLE))?,
                    get("PROVISION_ADMIN_ROLE_DB", Some(DEFAULT_ROLE_DB))?,
                )],
            ),
            collections,
            unique_index,
            verify_login: parse(
                "PROVISION_VERIFY_LOGIN",
                &get("PROVISION_VERIFY_LOGIN", Some("false"))?,
            )?,
        };
        plan.validate()?;

        let retry = RetryConfig::with_max_retries(parse(
            "PROVISION_MAX_RETRIES",
            &get("PROVISION_MAX_RETRIES", Some(DEFAULT_MAX_RETRIES))?,
        )?);

        Ok(ProvisionerConfig {
            common,
            mongodb,
            plan,
            retry,
        })
    }
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}
