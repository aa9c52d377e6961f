use serde::Serialize;
use std::fmt;

/// A provisioning step, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ValidatePlan,
    Connect,
    EnsureDatabase,
    CreateUser,
    EnsureCollection(String),
    EnsureUniqueIndex,
    VerifyLogin,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ValidatePlan => write!(f, "validate_plan"),
            Step::Connect => write!(f, "connect"),
            Step::EnsureDatabase => write!(f, "ensure_database"),
            Step::CreateUser => write!(f, "create_user"),
            Step::EnsureCollection(name) => write!(f, "ensure_collection({})", name),
            Step::EnsureUniqueIndex => write!(f, "ensure_unique_index"),
            Step::VerifyLogin => write!(f, "verify_login"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The object did not exist and was created.
    Created,
    /// The object already existed and was left untouched.
    AlreadyPresent,
    /// The database was selected; it materializes on its first write.
    Selected,
    /// A read-only check passed.
    Verified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub outcome: Outcome,
}

/// What a provisioning run did, step by step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub database: String,
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, step: Step, outcome: Outcome) {
        self.steps.push(StepReport { step, outcome });
    }

    pub fn outcome_of(&self, step: &Step) -> Option<Outcome> {
        self.steps
            .iter()
            .find(|s| &s.step == step)
            .map(|s| s.outcome)
    }

    pub fn created_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == Outcome::Created)
            .count()
    }

    /// True when the run found everything in place and changed nothing.
    pub fn is_noop(&self) -> bool {
        self.created_count() == 0
    }
}
