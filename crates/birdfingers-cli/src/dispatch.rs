use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use birdfingers_jobs::{JobPoll, JobRequest, JobStatus, JobSummary};
use serde::Serialize;

use crate::config::Settings;
use crate::render::{
    current_output_style, job_status_label, render_doctor_lines, render_history_lines,
    render_installed_lines, render_plan_lines, render_project_lines, render_section_header,
    render_snapshot_detail_lines, render_snapshot_lines, render_status_line, JobSpinner,
    OutputStyle,
};
use crate::workbench::{PlanReport, Workbench};
use crate::{Cli, Commands, FollowArgs, SnapshotCommands};

pub(crate) fn run_cli(cli: Cli, settings: Settings) -> Result<()> {
    let output_style = current_output_style();
    let json = cli.json;
    let workbench = Workbench::open(settings)?;

    match cli.command {
        Commands::List => {
            let installed = workbench.installed()?;
            if json {
                return print_json(&installed);
            }
            print_lines(&render_installed_lines(&installed));
        }
        Commands::Show { name } => {
            print!("{}", workbench.show(&name)?);
        }
        Commands::Search { name } => {
            let info = workbench.project(&name)?;
            if json {
                return print_json(&info);
            }
            print_lines(&render_project_lines(&info));
        }
        Commands::Install {
            name,
            version,
            follow,
        } => {
            let request = JobRequest::InstallByName { name, version };
            submit_and_follow(&workbench, request, follow, json, output_style)?;
        }
        Commands::Set {
            name,
            version,
            follow,
        } => {
            let request = JobRequest::InstallExact { name, version };
            submit_and_follow(&workbench, request, follow, json, output_style)?;
        }
        Commands::Uninstall { names, follow } => {
            let request = JobRequest::UninstallBatch { names };
            submit_and_follow(&workbench, request, follow, json, output_style)?;
        }
        Commands::Snapshot { command } => {
            run_snapshot_command(&workbench, command, json, output_style)?;
        }
        Commands::History { limit } => {
            let records = workbench.audit_log().read_all()?;
            let recent = &records[records.len().saturating_sub(limit)..];
            if json {
                return print_json(&recent);
            }
            print_lines(&render_history_lines(recent));
        }
        Commands::Doctor => {
            let report = workbench.doctor().with_context(|| {
                format!(
                    "package manager check failed (data: {})",
                    workbench.layout().data_dir().display()
                )
            })?;
            if json {
                return print_json(&report);
            }
            print_lines(&render_doctor_lines(&report));
            println!(
                "{}",
                render_status_line(output_style, "ok", "environment looks usable")
            );
        }
        Commands::Completions { .. } => {
            return Err(anyhow!("completions are written before settings load"));
        }
    }

    Ok(())
}

fn run_snapshot_command(
    workbench: &Workbench,
    command: SnapshotCommands,
    json: bool,
    output_style: OutputStyle,
) -> Result<()> {
    match command {
        SnapshotCommands::Save { name, comment } => {
            let meta = workbench.save_snapshot(&name, &comment)?;
            if json {
                return print_json(&meta);
            }
            println!(
                "{}",
                render_status_line(
                    output_style,
                    "ok",
                    &format!("saved snapshot {} ({} pins)", meta.id, meta.count)
                )
            );
        }
        SnapshotCommands::List => {
            let metas = workbench.list_snapshots()?;
            if json {
                return print_json(&metas);
            }
            if metas.is_empty() {
                println!("No snapshots in {}", workbench.layout().snapshots_dir().display());
            }
            print_lines(&render_snapshot_lines(&metas));
        }
        SnapshotCommands::Show { id } => {
            let snapshot = workbench.snapshot(&id)?;
            if json {
                return print_json(&snapshot.meta);
            }
            print_lines(&render_snapshot_detail_lines(&snapshot.meta));
        }
        SnapshotCommands::Export { id, output } => {
            let snapshot = workbench.snapshot(&id)?;
            match output {
                Some(path) => {
                    fs::write(&path, &snapshot.payload).with_context(|| {
                        format!("failed writing snapshot payload: {}", path.display())
                    })?;
                    println!(
                        "{}",
                        render_status_line(
                            output_style,
                            "ok",
                            &format!("wrote {} to {}", snapshot.meta.requirements, path.display())
                        )
                    );
                }
                None => print!("{}", snapshot.payload),
            }
        }
        SnapshotCommands::Delete { id } => {
            if !workbench.delete_snapshot(&id)? {
                return Err(anyhow!("snapshot '{id}' was only partially deleted"));
            }
            println!(
                "{}",
                render_status_line(output_style, "ok", &format!("deleted snapshot {id}"))
            );
        }
        SnapshotCommands::Preview { id } => {
            print_plan(&workbench.preview(&id)?, json, output_style)?;
        }
        SnapshotCommands::Diff { from, to } => {
            print_plan(&workbench.diff(&from, &to)?, json, output_style)?;
        }
        SnapshotCommands::Restore {
            id,
            dry_run,
            follow,
        } => {
            if dry_run {
                return print_plan(&workbench.preview(&id)?, json, output_style);
            }
            let job_id = workbench.restore(&id)?;
            follow_and_report(workbench, &job_id, "restore", follow, json, output_style)?;
        }
    }

    Ok(())
}

fn submit_and_follow(
    workbench: &Workbench,
    request: JobRequest,
    follow: FollowArgs,
    json: bool,
    output_style: OutputStyle,
) -> Result<()> {
    let label = request.kind().as_str();
    let job_id = workbench.submit(request)?;
    follow_and_report(workbench, &job_id, label, follow, json, output_style)
}

/// Final state of a followed job for `--json` output.
#[derive(Serialize)]
struct JobReport {
    #[serde(flatten)]
    summary: JobSummary,
    output: String,
}

fn follow_and_report(
    workbench: &Workbench,
    job_id: &str,
    label: &str,
    follow: FollowArgs,
    json: bool,
    output_style: OutputStyle,
) -> Result<()> {
    let timeout = follow.timeout_secs.map(Duration::from_secs);
    if json {
        let mut output = String::new();
        let poll = follow_job(workbench, job_id, timeout, &mut |text: &str| {
            output.push_str(text)
        })?;
        print_json(&JobReport {
            summary: workbench.job_summary(job_id)?,
            output,
        })?;
        return job_result(&poll);
    }

    if let Some(header) = render_section_header(output_style, label) {
        println!("{header}");
    }
    let spinner = JobSpinner::start(output_style, label);
    let outcome = follow_job(
        workbench,
        job_id,
        timeout,
        &mut |text: &str| spinner.print(text),
    );
    spinner.finish();
    let poll = outcome?;

    job_result(&poll)?;
    println!(
        "{}",
        render_status_line(output_style, "ok", &format!("{label} finished"))
    );
    Ok(())
}

/// Polls `job_id` at the configured cadence, handing each output delta to
/// `on_output`, until the job is done. Past `timeout` the job is cancelled
/// once and followed to its end.
pub(crate) fn follow_job(
    workbench: &Workbench,
    job_id: &str,
    timeout: Option<Duration>,
    on_output: &mut dyn FnMut(&str),
) -> Result<JobPoll> {
    let started = Instant::now();
    let interval = workbench.settings().poll_interval;
    let mut cursor = 0;
    let mut cancel_requested = false;

    loop {
        let poll = workbench.poll(job_id, cursor)?;
        if !poll.text.is_empty() {
            on_output(&poll.text);
        }
        cursor = poll.cursor;
        if poll.done {
            return Ok(poll);
        }

        if !cancel_requested && timeout.is_some_and(|timeout| started.elapsed() >= timeout) {
            tracing::warn!(job_id, "job exceeded timeout; cancelling");
            workbench.cancel(job_id)?;
            cancel_requested = true;
        }
        thread::sleep(interval);
    }
}

/// Success only for a zero exit.
pub(crate) fn job_result(poll: &JobPoll) -> Result<()> {
    match &poll.status {
        JobStatus::Exited { code: 0 } => Ok(()),
        JobStatus::Exited { code } => Err(anyhow!("job failed with exit code {code}")),
        other => Err(anyhow!("job did not complete: {}", job_status_label(other))),
    }
}

fn print_plan(report: &PlanReport, json: bool, output_style: OutputStyle) -> Result<()> {
    if json {
        return print_json(report);
    }
    print_lines(&render_plan_lines(report));
    if report.plan.is_noop() {
        println!("{}", render_status_line(output_style, "ok", "nothing to change"));
    }
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
