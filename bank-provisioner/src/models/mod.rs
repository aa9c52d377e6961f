pub mod plan;
pub mod report;

pub use plan::{IndexSpec, ProvisionPlan, RoleGrant, UserSpec};
pub use report::{Outcome, ProvisionReport, Step, StepReport};
