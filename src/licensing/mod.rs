//! License decisions: plan quotas, device binding, usage accounting.

pub mod device_policy;
pub mod ledger;
pub mod plans;
mod resolver;

pub use plans::{Plan, PlanTier, plan_for};
pub use resolver::*;
