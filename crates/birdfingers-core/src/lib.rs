mod capture;
mod error;
mod package_set;
mod plan;

pub use capture::EnvironmentCapture;
pub use error::{Error, Result};
pub use package_set::{normalize_name, PackageSet, PinnedPackage};
pub use plan::{
    diff, PlanCounts, PlanStep, PlannedInstall, PlannedUninstall, ReconciliationPlan,
    UnchangedPackage,
};

#[cfg(test)]
mod tests;
