use provision_core::error::AppError;
use secrecy::Secret;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_DATABASE: &str = "bank";
pub const DEFAULT_ADMIN_USER: &str = "dev";
pub const DEFAULT_ROLE: &str = "root";
pub const DEFAULT_ROLE_DB: &str = "admin";
pub const DEFAULT_COLLECTIONS: [&str; 2] = ["accounts", "transfers"];
pub const DEFAULT_UNIQUE_INDEX: &str = "accounts.cpf";

/// A role granted to the provisioned user, scoped to `db`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleGrant {
    pub role: String,
    pub db: String,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }
}

/// Ascending single-field unique index, written as `collection.field`.
///
/// The field part may itself be a dotted path into embedded documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub collection: String,
    pub field: String,
}

impl IndexSpec {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Server default name for an ascending index on `field`.
    pub fn index_name(&self) -> String {
        format!("{}_1", self.field)
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.field)
    }
}

impl FromStr for IndexSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((collection, field)) if !collection.is_empty() && !field.is_empty() => {
                Ok(IndexSpec::new(collection, field))
            }
            _ => Err(format!(
                "Invalid unique index '{}', expected <collection>.<field>",
                s
            )),
        }
    }
}

/// The user created by provisioning. The password is never logged.
#[derive(Debug, Clone)]
pub struct UserSpec {
    pub username: String,
    pub password: Secret<String>,
    pub roles: Vec<RoleGrant>,
}

impl UserSpec {
    pub fn new(username: impl Into<String>, password: Secret<String>, roles: Vec<RoleGrant>) -> Self {
        Self {
            username: username.into(),
            password,
            roles,
        }
    }
}

/// Everything one provisioning run creates, in the order it is created.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub database: String,
    pub admin_user: UserSpec,
    pub collections: Vec<String>,
    pub unique_index: Option<IndexSpec>,
    pub verify_login: bool,
}

impl ProvisionPlan {
    /// The `bank` layout: `dev` with `root@admin`, `accounts` and `transfers`,
    /// and a unique index on `accounts.cpf`.
    pub fn bank(password: Secret<String>) -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            admin_user: UserSpec::new(
                DEFAULT_ADMIN_USER,
                password,
                vec![RoleGrant::new(DEFAULT_ROLE, DEFAULT_ROLE_DB)],
            ),
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
            unique_index: Some(IndexSpec::new("accounts", "cpf")),
            verify_login: false,
        }
    }

    /// Same plan with the unique index step removed.
    pub fn without_unique_index(mut self) -> Self {
        self.unique_index = None;
        self
    }

    /// Collections to ensure: the configured list without repeats, followed by
    /// the indexed collection when it is not already listed.
    pub fn collections_to_ensure(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.collections.len() + 1);
        let indexed = self.unique_index.iter().map(|i| i.collection.as_str());
        for name in self.collections.iter().map(String::as_str).chain(indexed) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_database_name(&self.database)?;

        if self.admin_user.username.trim().is_empty() {
            return Err(config_error("admin username must not be empty"));
        }
        for grant in &self.admin_user.roles {
            if grant.role.trim().is_empty() || grant.db.trim().is_empty() {
                return Err(config_error("role name and role database must not be empty"));
            }
        }

        for name in self.collections_to_ensure() {
            validate_collection_name(name)?;
        }

        Ok(())
    }
}

const FORBIDDEN_DATABASE_CHARS: [char; 7] = ['/', '\\', '.', ' ', '"', '$', '\0'];

fn validate_database_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(config_error("database name must not be empty"));
    }
    if name.len() >= 64 {
        return Err(config_error(format!(
            "database name '{}' must be shorter than 64 bytes",
            name
        )));
    }
    if name.contains(FORBIDDEN_DATABASE_CHARS) {
        return Err(config_error(format!(
            "database name '{}' contains a forbidden character",
            name
        )));
    }
    Ok(())
}

fn validate_collection_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(config_error("collection name must not be empty"));
    }
    if name.contains('$') || name.contains('\0') {
        return Err(config_error(format!(
            "collection name '{}' contains a forbidden character",
            name
        )));
    }
    if name.starts_with("system.") {
        return Err(config_error(format!(
            "collection name '{}' uses the reserved system. prefix",
            name
        )));
    }
    Ok(())
}

fn config_error(message: impl fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!("{}", message))
}
