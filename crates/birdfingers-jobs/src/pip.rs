use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use birdfingers_core::{EnvironmentCapture, Error, Result};

use crate::{CancelToken, CommandExecutor, ExitOutcome, JobRequest, OutputStream};

const PIP_SERVICE: &str = "pip";

/// Builds `<python> -m pip ...` command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipLauncher {
    python: String,
}

impl PipLauncher {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    /// Prefix used when rendering plan commands for display.
    pub fn display_prefix(&self) -> String {
        format!("{} -m pip", self.python)
    }

    pub fn argv<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![self.python.clone(), "-m".to_string(), "pip".to_string()];
        argv.extend(args.into_iter().map(Into::into));
        argv
    }

    pub fn job_argv(&self, request: &JobRequest) -> Result<Vec<String>> {
        match request {
            JobRequest::InstallExact { name, version } => {
                let name = require_name(name)?;
                if version.trim().is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "install of '{name}' needs a version"
                    )));
                }
                Ok(self.argv(["install".to_string(), format!("{name}=={}", version.trim())]))
            }
            JobRequest::InstallByName { name, version } => {
                let name = require_name(name)?;
                let target = match version.as_deref().map(str::trim) {
                    Some(version) if !version.is_empty() => format!("{name}=={version}"),
                    _ => name.to_string(),
                };
                Ok(self.argv(["install".to_string(), target]))
            }
            JobRequest::UninstallBatch { names } => {
                let names = names
                    .iter()
                    .map(|name| require_name(name).map(str::to_string))
                    .collect::<Result<Vec<_>>>()?;
                if names.is_empty() {
                    return Err(Error::InvalidInput(
                        "uninstall needs at least one package".to_string(),
                    ));
                }
                let mut args = vec!["uninstall".to_string(), "-y".to_string()];
                args.extend(names);
                Ok(self.argv(args))
            }
            JobRequest::RestoreFromSnapshot { requirements, .. } => Ok(self.argv([
                "install".to_string(),
                "-r".to_string(),
                requirements.display().to_string(),
            ])),
        }
    }
}

fn require_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name.starts_with('-') {
        return Err(Error::InvalidInput(format!("invalid package name: '{name}'")));
    }
    Ok(name)
}

#[derive(Debug, Default)]
struct Collected {
    stdout: String,
    stderr: String,
}

/// Synchronous package-manager queries against the live environment.
#[derive(Clone)]
pub struct PipEnvironment {
    launcher: PipLauncher,
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl PipEnvironment {
    pub fn new(launcher: PipLauncher, executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self {
            launcher,
            executor,
            timeout,
        }
    }

    pub fn launcher(&self) -> &PipLauncher {
        &self.launcher
    }

    fn run(&self, args: &[&str]) -> Result<(i32, Collected)> {
        let argv = self.launcher.argv(args.iter().copied());
        let collected = Mutex::new(Collected::default());
        let sink = |stream: OutputStream, chunk: &str| {
            let mut collected = collected.lock().unwrap_or_else(PoisonError::into_inner);
            match stream {
                OutputStream::Stdout => collected.stdout.push_str(chunk),
                OutputStream::Stderr => collected.stderr.push_str(chunk),
            }
        };

        let cancel = CancelToken::with_timeout(self.timeout);
        let outcome = match self.executor.execute(&argv, &sink, &cancel) {
            Ok(outcome) => outcome,
            Err(err @ Error::Launch { .. }) => {
                return Err(Error::upstream(PIP_SERVICE, err.to_string()))
            }
            Err(err) => return Err(err),
        };
        let collected = collected.into_inner().unwrap_or_else(PoisonError::into_inner);

        match outcome {
            ExitOutcome::Exited(code) => Ok((code, collected)),
            ExitOutcome::Cancelled => Err(Error::upstream(
                PIP_SERVICE,
                format!(
                    "'{}' timed out after {}s",
                    argv.join(" "),
                    self.timeout.as_secs()
                ),
            )),
        }
    }

    /// `pip --version` output.
    pub fn version(&self) -> Result<String> {
        let (code, collected) = self.run(&["--version"])?;
        if code != 0 {
            return Err(Error::upstream(
                PIP_SERVICE,
                format!("pip --version exited with {code}: {}", collected.stderr.trim()),
            ));
        }
        Ok(collected.stdout.trim().to_string())
    }

    /// `pip show -f <name>` output.
    pub fn show(&self, name: &str) -> Result<String> {
        let name = require_name(name)?;
        let (code, collected) = self.run(&["show", "-f", name])?;
        if code != 0 {
            if collected.stderr.contains("not found") {
                return Err(Error::not_found("package", name));
            }
            return Err(Error::upstream(
                PIP_SERVICE,
                format!("pip show exited with {code}: {}", collected.stderr.trim()),
            ));
        }
        Ok(collected.stdout)
    }
}

impl EnvironmentCapture for PipEnvironment {
    fn freeze(&self) -> Result<String> {
        let (code, collected) = self.run(&["freeze"])?;
        if code != 0 {
            return Err(Error::upstream(
                PIP_SERVICE,
                format!("pip freeze exited with {code}: {}", collected.stderr.trim()),
            ));
        }
        Ok(collected.stdout)
    }

    fn interpreter(&self) -> Option<String> {
        Some(self.launcher.python().to_string())
    }
}
