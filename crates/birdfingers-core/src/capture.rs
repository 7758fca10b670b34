use crate::{PackageSet, Result};

/// Source of the live environment's pin text (the package manager's
/// `freeze` output).
pub trait EnvironmentCapture: Send + Sync {
    fn freeze(&self) -> Result<String>;

    /// Interpreter the captured environment belongs to, when known.
    fn interpreter(&self) -> Option<String> {
        None
    }

    fn capture(&self) -> Result<PackageSet> {
        Ok(PackageSet::parse(&self.freeze()?))
    }
}
