use serde::{Deserialize, Serialize};

use crate::PackageSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedInstall {
    pub name: String,
    pub from: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUninstall {
    pub name: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnchangedPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub install: usize,
    pub uninstall: usize,
    pub unchanged: usize,
}

/// One mutating step, independent of how the package manager spells it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanStep {
    UninstallAll { names: Vec<String> },
    InstallPinned { name: String, version: String },
}

impl PlanStep {
    /// Package-manager arguments for this step, without the launcher prefix.
    pub fn pip_args(&self) -> Vec<String> {
        match self {
            Self::UninstallAll { names } => {
                let mut args = vec!["uninstall".to_string(), "-y".to_string()];
                args.extend(names.iter().cloned());
                args
            }
            Self::InstallPinned { name, version } => {
                vec!["install".to_string(), format!("{name}=={version}")]
            }
        }
    }
}

/// Classification of every package between a source and a target set.
///
/// Computed on demand and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub installs: Vec<PlannedInstall>,
    pub uninstalls: Vec<PlannedUninstall>,
    pub unchanged: Vec<UnchangedPackage>,
}

pub fn diff(source: &PackageSet, target: &PackageSet) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    for (key, wanted) in target.entries() {
        match source.get(key) {
            None => plan.installs.push(PlannedInstall {
                name: wanted.display_name.clone(),
                from: None,
                to: wanted.version.clone(),
            }),
            Some(current) if current.version != wanted.version => {
                plan.installs.push(PlannedInstall {
                    name: wanted.display_name.clone(),
                    from: Some(current.version.clone()),
                    to: wanted.version.clone(),
                })
            }
            Some(_) => plan.unchanged.push(UnchangedPackage {
                name: wanted.display_name.clone(),
                version: wanted.version.clone(),
            }),
        }
    }

    for (key, current) in source.entries() {
        if !target.contains(key) {
            plan.uninstalls.push(PlannedUninstall {
                name: current.display_name.clone(),
                from: current.version.clone(),
            });
        }
    }

    plan
}

impl ReconciliationPlan {
    pub fn counts(&self) -> PlanCounts {
        PlanCounts {
            install: self.installs.len(),
            uninstall: self.uninstalls.len(),
            unchanged: self.unchanged.len(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.installs.is_empty() && self.uninstalls.is_empty()
    }

    /// Ordered steps: one uninstall covering every removed package first,
    /// then one exact-pin install per added or changed package.
    pub fn steps(&self) -> Vec<PlanStep> {
        let mut steps = Vec::with_capacity(self.installs.len() + 1);
        if !self.uninstalls.is_empty() {
            let mut names = self
                .uninstalls
                .iter()
                .map(|entry| entry.name.clone())
                .collect::<Vec<_>>();
            names.sort();
            steps.push(PlanStep::UninstallAll { names });
        }
        for install in &self.installs {
            steps.push(PlanStep::InstallPinned {
                name: install.name.clone(),
                version: install.to.clone(),
            });
        }
        steps
    }

    /// Shell-style rendering of `steps()` using `launcher` (for example
    /// `python -m pip`) as the command prefix.
    pub fn command_lines(&self, launcher: &str) -> Vec<String> {
        self.steps()
            .iter()
            .map(|step| format!("{launcher} {}", step.pip_args().join(" ")))
            .collect()
    }
}
