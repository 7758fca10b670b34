use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use birdfingers_core::PackageSet;
use birdfingers_index::ProjectInfo;
use birdfingers_jobs::JobStatus;
use birdfingers_store::{AuditRecord, SnapshotMeta};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};

use crate::workbench::{DoctorReport, PlanReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style() -> OutputStyle {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    if !no_color && std::io::stdout().is_terminal() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "error" => "[ERR]",
        _ => "[..]",
    }
}

pub fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn render_installed_lines(set: &PackageSet) -> Vec<String> {
    let mut lines = set
        .entries()
        .map(|(_, pin)| format!("{}=={}", pin.display_name, pin.version))
        .collect::<Vec<_>>();
    lines.extend(set.other_lines().iter().map(|line| format!("other {line}")));
    lines
}

pub fn render_project_lines(info: &ProjectInfo) -> Vec<String> {
    let mut lines = vec![format!("project: {}", info.name)];
    if let Some(summary) = &info.summary {
        lines.push(format!("summary: {summary}"));
    }
    if let Some(requires_python) = &info.requires_python {
        lines.push(format!("requires-python: {requires_python}"));
    }
    lines.push(format!(
        "latest: {}",
        info.latest.as_deref().unwrap_or("(no releases)")
    ));
    lines.push(format!(
        "versions ({}): {}",
        HumanCount(info.versions.len() as u64),
        info.versions.join(" ")
    ));
    lines
}

pub fn render_snapshot_lines(metas: &[SnapshotMeta]) -> Vec<String> {
    metas
        .iter()
        .map(|meta| {
            let mut line = format!(
                "{} created={} pins={}",
                meta.id, meta.created_utc, meta.count
            );
            if !meta.comment.is_empty() {
                line.push_str(&format!(" comment={:?}", meta.comment));
            }
            line
        })
        .collect()
}

pub fn render_snapshot_detail_lines(meta: &SnapshotMeta) -> Vec<String> {
    let mut lines = vec![
        format!("id: {}", meta.id),
        format!("name: {}", meta.name),
        format!("created: {}", meta.created_utc),
        format!("pins: {}", meta.count),
        format!("payload: {}", meta.requirements),
    ];
    if !meta.comment.is_empty() {
        lines.push(format!("comment: {}", meta.comment));
    }
    if let Some(python) = &meta.python {
        lines.push(format!("python: {python}"));
    }
    lines
}

/// Line-per-fact rendering of a preview or diff; stable for scripting.
pub fn render_plan_lines(report: &PlanReport) -> Vec<String> {
    let counts = report.plan.counts();
    let mut lines = vec![
        format!(
            "plan source={} target={}",
            report.source.label, report.target.label
        ),
        format!(
            "plan_summary install={} uninstall={} unchanged={} other_source={} other_target={}",
            counts.install,
            counts.uninstall,
            counts.unchanged,
            report.source.other_lines,
            report.target.other_lines
        ),
    ];

    for install in &report.plan.installs {
        lines.push(format!(
            "change_install name={} from={} to={}",
            install.name,
            install.from.as_deref().unwrap_or("-"),
            install.to
        ));
    }
    for uninstall in &report.plan.uninstalls {
        lines.push(format!(
            "change_uninstall name={} from={}",
            uninstall.name, uninstall.from
        ));
    }
    for command in &report.commands {
        lines.push(format!("command {command}"));
    }
    lines.push(format!("note {}", report.note));
    lines
}

pub fn render_doctor_lines(report: &DoctorReport) -> Vec<String> {
    vec![
        format!("python: {}", report.python),
        format!("pip: {}", report.pip_version),
        format!("index: {}", report.index_url),
        format!("data: {}", report.data_dir.display()),
        format!("snapshots: {} ({})", report.snapshots_dir.display(), report.snapshot_count),
        format!("log: {}", report.log_path.display()),
        format!("audit: {}", report.audit_path.display()),
    ]
}

pub fn render_history_lines(records: &[AuditRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let details = record
                .details
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            let exit = record
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{} {} {} exit={} {}",
                record.timestamp, record.action, record.status, exit, details
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn job_status_label(status: &JobStatus) -> String {
    match status {
        JobStatus::Created => "created".to_string(),
        JobStatus::Running => "running".to_string(),
        JobStatus::Exited { code } => format!("exited({code})"),
        JobStatus::Cancelled => "cancelled".to_string(),
        JobStatus::Errored { message } => format!("errored({message})"),
    }
}

/// Spinner shown while a job is followed; output is printed above it.
pub struct JobSpinner {
    progress_bar: Option<ProgressBar>,
}

impl JobSpinner {
    pub fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = (style == OutputStyle::Rich).then(|| {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(spinner_style) =
                ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed_precise}")
            {
                progress_bar.set_style(spinner_style.tick_chars(".oO@* "));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        });
        Self { progress_bar }
    }

    pub fn print(&self, text: &str) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.suspend(|| print!("{text}")),
            None => print!("{text}"),
        }
    }

    pub fn finish(self) {
        if let Some(progress_bar) = self.progress_bar {
            progress_bar.finish_and_clear();
        }
    }
}
