use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use birdfingers_core::{Error, Result};

const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag asking a running command to stop, optionally with a deadline
/// after which it counts as cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.timed_out()
    }

    pub fn timed_out(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Cancelled,
}

/// Starts an external command and streams its output to `sink` line by line
/// until it exits or `cancel` fires.
///
/// Failing to start the command is an `Err`; a non-zero exit is not.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        argv: &[String],
        sink: &(dyn Fn(OutputStream, &str) + Sync),
        cancel: &CancelToken,
    ) -> Result<ExitOutcome>;

    /// Like `execute`, with stderr folded into stdout so `sink` sees lines in
    /// the order the command wrote them.
    fn execute_combined(
        &self,
        argv: &[String],
        sink: &(dyn Fn(&str) + Sync),
        cancel: &CancelToken,
    ) -> Result<ExitOutcome> {
        self.execute(argv, &|_stream: OutputStream, line: &str| sink(line), cancel)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    wait_interval: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            wait_interval: DEFAULT_WAIT_INTERVAL,
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(
        &self,
        program: &str,
        args: &[String],
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<Child> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .env("PYTHONUNBUFFERED", "1");
        // `command` owns the parent's copies of the output handles; they close
        // when it drops at the end of this function.
        let child = command.spawn().map_err(|source| Error::Launch {
            program: program.to_string(),
            source,
        })?;
        tracing::debug!(pid = child.id(), program = %program, "started command");
        Ok(child)
    }

    fn wait_for_exit(
        &self,
        child: &mut Child,
        program: &str,
        cancel: &CancelToken,
    ) -> Result<ExitOutcome> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(ExitOutcome::Exited(exit_code(status))),
                Ok(None) => {}
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Process {
                        program: program.to_string(),
                        source,
                    });
                }
            }

            if cancel.is_cancelled() {
                tracing::debug!(pid = child.id(), "cancelling command");
                if let Err(source) = child.kill() {
                    if source.kind() != io::ErrorKind::InvalidInput {
                        return Err(Error::Process {
                            program: program.to_string(),
                            source,
                        });
                    }
                }
                let _ = child.wait();
                return Ok(ExitOutcome::Cancelled);
            }

            thread::sleep(self.wait_interval);
        }
    }
}

fn split_argv(argv: &[String]) -> Result<(&String, &[String])> {
    argv.split_first()
        .ok_or_else(|| Error::InvalidInput("empty command line".to_string()))
}

impl CommandExecutor for ProcessExecutor {
    fn execute(
        &self,
        argv: &[String],
        sink: &(dyn Fn(OutputStream, &str) + Sync),
        cancel: &CancelToken,
    ) -> Result<ExitOutcome> {
        let (program, args) = split_argv(argv)?;
        let mut child = self.spawn(program, args, Stdio::piped(), Stdio::piped())?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        thread::scope(|scope| {
            if let Some(stdout) = stdout {
                scope.spawn(move || {
                    pump_lines(stdout, &|line: &str| sink(OutputStream::Stdout, line))
                });
            }
            if let Some(stderr) = stderr {
                scope.spawn(move || {
                    pump_lines(stderr, &|line: &str| sink(OutputStream::Stderr, line))
                });
            }
            self.wait_for_exit(&mut child, program, cancel)
        })
    }

    fn execute_combined(
        &self,
        argv: &[String],
        sink: &(dyn Fn(&str) + Sync),
        cancel: &CancelToken,
    ) -> Result<ExitOutcome> {
        let (program, args) = split_argv(argv)?;
        let launch_error = |source: io::Error| Error::Launch {
            program: program.clone(),
            source,
        };
        let (reader, writer) = os_pipe::pipe().map_err(launch_error)?;
        let writer_for_stderr = writer.try_clone().map_err(launch_error)?;
        let mut child = self.spawn(
            program,
            args,
            Stdio::from(writer),
            Stdio::from(writer_for_stderr),
        )?;

        thread::scope(|scope| {
            scope.spawn(move || pump_lines(reader, sink));
            self.wait_for_exit(&mut child, program, cancel)
        })
    }
}

fn pump_lines(reader: impl Read, sink: &(dyn Fn(&str) + Sync)) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => sink(&String::from_utf8_lossy(&line)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!("stopped reading command output: {err}");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
