//! Provisioning routine for the bank database.
//!
//! Steps run strictly in order and every step is safe to repeat: existing
//! users, collections and indexes are detected and left untouched. The first
//! failing step aborts the run and is named in the returned error.

use crate::models::{IndexSpec, Outcome, ProvisionPlan, ProvisionReport, Step, UserSpec};
use crate::services::target::ProvisionTarget;
use provision_core::error::AppError;
use provision_core::retry::{retry_call, RetryConfig};
use std::future::Future;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct ProvisionError {
    pub step: Step,
    #[source]
    pub source: AppError,
}

impl ProvisionError {
    pub fn exit_code(&self) -> u8 {
        self.source.exit_code()
    }
}

pub struct Provisioner<'a, T: ProvisionTarget> {
    target: &'a T,
    retry: RetryConfig,
}

impl<'a, T: ProvisionTarget> Provisioner<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self {
            target,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run every step of `plan` and report what each one did.
    #[instrument(skip_all, fields(database = %plan.database))]
    pub async fn run(&self, plan: &ProvisionPlan) -> Result<ProvisionReport, ProvisionError> {
        let mut report = ProvisionReport::new(&plan.database);

        plan.validate().map_err(|source| ProvisionError {
            step: Step::ValidatePlan,
            source,
        })?;

        self.attempt(&mut report, Step::Connect, || async {
            self.target.ping().await.map(|_| Outcome::Verified)
        })
        .await?;

        let handle = self.ensure_database(&plan.database);
        report.record(Step::EnsureDatabase, Outcome::Selected);

        self.attempt(&mut report, Step::CreateUser, || {
            self.create_user(&handle, &plan.admin_user)
        })
        .await?;

        for name in plan.collections_to_ensure() {
            self.attempt(&mut report, Step::EnsureCollection(name.to_string()), || {
                self.ensure_collection(&handle, name)
            })
            .await?;
        }

        if let Some(index) = &plan.unique_index {
            self.attempt(&mut report, Step::EnsureUniqueIndex, || {
                self.ensure_unique_index(&handle, index)
            })
            .await?;
        }

        if plan.verify_login {
            self.attempt(&mut report, Step::VerifyLogin, || {
                self.verify_login(&handle, &plan.admin_user)
            })
            .await?;
        }

        info!(
            created = report.created_count(),
            steps = report.steps.len(),
            "Provisioning completed"
        );
        Ok(report)
    }

    /// Select `name`; the database materializes on its first write.
    pub fn ensure_database(&self, name: &str) -> T::Handle {
        info!(database = %name, "Selected database");
        self.target.database(name)
    }

    /// Create the user unless it is already defined in `db`. An existing user
    /// keeps its current password and roles.
    #[instrument(skip(self, db, user), fields(username = %user.username))]
    pub async fn create_user(&self, db: &T::Handle, user: &UserSpec) -> Result<Outcome, AppError> {
        if self.target.user_exists(db, &user.username).await? {
            info!("User already exists, leaving it unchanged");
            return Ok(Outcome::AlreadyPresent);
        }

        match self.target.create_user(db, user).await {
            Ok(()) => {
                info!(roles = ?user.roles, "Created user");
                Ok(Outcome::Created)
            }
            Err(e) if e.is_already_exists() => Ok(Outcome::AlreadyPresent),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, db))]
    pub async fn ensure_collection(&self, db: &T::Handle, name: &str) -> Result<Outcome, AppError> {
        let existing = self.target.collection_names(db).await?;
        if existing.iter().any(|c| c == name) {
            info!("Collection already exists");
            return Ok(Outcome::AlreadyPresent);
        }

        match self.target.create_collection(db, name).await {
            Ok(()) => {
                info!("Created collection");
                Ok(Outcome::Created)
            }
            Err(e) if e.is_already_exists() => Ok(Outcome::AlreadyPresent),
            Err(e) => Err(e),
        }
    }

    /// Ensure an ascending unique index on `index.field`. Any existing index
    /// with that key and uniqueness satisfies the step, whatever its name.
    /// Fails when stored documents already share a value for the field.
    #[instrument(skip(self, db, index), fields(index = %index))]
    pub async fn ensure_unique_index(
        &self,
        db: &T::Handle,
        index: &IndexSpec,
    ) -> Result<Outcome, AppError> {
        let existing = self.target.list_indexes(db, &index.collection).await?;
        if let Some(found) = existing
            .iter()
            .find(|i| i.is_unique_ascending_on(&index.field))
        {
            info!(index_name = %found.name, "Unique index already exists");
            return Ok(Outcome::AlreadyPresent);
        }

        self.target.create_unique_index(db, index).await?;
        info!(index_name = %index.index_name(), "Created unique index");
        Ok(Outcome::Created)
    }

    #[instrument(skip(self, db, user), fields(username = %user.username))]
    pub async fn verify_login(&self, db: &T::Handle, user: &UserSpec) -> Result<Outcome, AppError> {
        self.target
            .authenticate(db, &user.username, &user.password)
            .await?;
        info!("Login verified");
        Ok(Outcome::Verified)
    }

    async fn attempt<F, Fut>(
        &self,
        report: &mut ProvisionReport,
        step: Step,
        f: F,
    ) -> Result<(), ProvisionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Outcome, AppError>>,
    {
        let operation = step.to_string();
        match retry_call(&self.retry, &operation, f).await {
            Ok(outcome) => {
                report.record(step, outcome);
                Ok(())
            }
            Err(source) => {
                tracing::error!(step = %step, error = %source, "Provisioning step failed");
                Err(ProvisionError { step, source })
            }
        }
    }
}
