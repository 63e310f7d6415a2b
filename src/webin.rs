use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::Credentials;
use crate::domain::{Environment, Severity};

pub const REPORT_FILE: &str = "webin-cli.report";
pub const DEFAULT_PROGRAM: &str = "ena-webin-cli";
pub const VALIDATED_MESSAGE: &str = "Submission(s) validated successfully.";
pub const COMPLETED_PREFIX: &str = "The submission has been completed successfully. \
     The following analysis accession was assigned to the submission:";

// 2025-06-06T12:55:57 INFO : Submission(s) validated successfully.
static LOG_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}) ([A-Z]+ *): (.+)$")
        .expect("log line pattern")
});
static ANALYSIS_EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"In analysis, alias: "webin-genome-(.+)"\. "#,
        r#"The object being added already exists in the submission account with accession: "(.+)"\. "#,
        r"The submission has failed because of a system error\."
    ))
    .expect("analysis exists pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    Validate,
    Submit,
}

impl ToolMode {
    fn flag(self) -> &'static str {
        match self {
            ToolMode::Validate => "-validate",
            ToolMode::Submit => "-submit",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Passed through as `-Xmx<value>`.
    pub java_max_heap: Option<String>,
    pub use_ascp: bool,
}

/// One line of a webin-cli report. `line` is 1-based; `None` marks the
/// synthetic entry for a missing report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub line: Option<usize>,
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(line: Option<usize>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            line,
            severity,
            message: message.into(),
        }
    }

    pub fn no_report() -> Self {
        Self::new(None, Severity::NoReport, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid,
    Submitted { accession: String },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalRunOutcome {
    pub entries: Vec<LogEntry>,
    pub verdict: Verdict,
}

pub fn evaluate_validation(entries: Vec<LogEntry>) -> ExternalRunOutcome {
    let valid = matches!(entries.as_slice(), [only] if only.message == VALIDATED_MESSAGE);
    ExternalRunOutcome {
        entries,
        verdict: if valid {
            Verdict::Valid
        } else {
            Verdict::Invalid
        },
    }
}

/// The first decisive line wins: an "already exists" error or a completion
/// notice yields an accession, any other error ends the scan.
pub fn evaluate_submission(entries: Vec<LogEntry>) -> ExternalRunOutcome {
    let mut verdict = Verdict::Failed;
    for entry in &entries {
        match entry.severity {
            Severity::Error => {
                if let Some(caps) = ANALYSIS_EXISTS_RE.captures(&entry.message) {
                    tracing::info!(
                        alias = &caps[1],
                        accession = &caps[2],
                        "analysis already registered, adopting accession"
                    );
                    verdict = Verdict::Submitted {
                        accession: caps[2].to_string(),
                    };
                }
                break;
            }
            Severity::Info if entry.message.starts_with(COMPLETED_PREFIX) => {
                if let Some(accession) = entry.message.split_whitespace().last() {
                    verdict = Verdict::Submitted {
                        accession: accession.to_string(),
                    };
                }
                break;
            }
            _ => {}
        }
    }
    ExternalRunOutcome { entries, verdict }
}

pub fn parse_report_line(line_number: usize, line: &str) -> LogEntry {
    let line = line.trim_end_matches(['\r', '\n']);
    match LOG_LINE_RE.captures(line) {
        Some(caps) => LogEntry::new(
            Some(line_number),
            Severity::from(caps[2].trim()),
            caps[3].trim(),
        ),
        None => LogEntry::new(Some(line_number), Severity::Unknown, line.trim()),
    }
}

pub fn parse_report(content: &str) -> Vec<LogEntry> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| parse_report_line(idx + 1, line))
        .collect()
}

/// Reads the report webin-cli leaves in `dir`. Never fails: an unreadable
/// or absent report becomes a single `NOREPORT` entry.
pub fn read_report(dir: &Path) -> Vec<LogEntry> {
    let path = dir.join(REPORT_FILE);
    match fs::read(&path) {
        Ok(bytes) => parse_report(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), "reading report failed: {err}");
            }
            vec![LogEntry::no_report()]
        }
    }
}

/// Removes the report of an earlier run so a tool that dies before writing
/// its own is read as `NOREPORT`.
fn discard_report(dir: &Path) {
    let path = dir.join(REPORT_FILE);
    match fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed previous report"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), "removing previous report failed: {err}"),
    }
}

pub trait SubmissionTool: Send + Sync {
    /// Runs the tool once against `manifest` and returns its report.
    fn invoke(
        &self,
        manifest: &Path,
        mode: ToolMode,
        environment: Environment,
        limits: &ResourceLimits,
    ) -> Vec<LogEntry>;

    fn validate(
        &self,
        manifest: &Path,
        environment: Environment,
        limits: &ResourceLimits,
    ) -> (bool, ExternalRunOutcome) {
        let outcome =
            evaluate_validation(self.invoke(manifest, ToolMode::Validate, environment, limits));
        (outcome.verdict == Verdict::Valid, outcome)
    }

    fn submit(
        &self,
        manifest: &Path,
        environment: Environment,
        limits: &ResourceLimits,
    ) -> (Option<String>, ExternalRunOutcome) {
        let outcome =
            evaluate_submission(self.invoke(manifest, ToolMode::Submit, environment, limits));
        let accession = match &outcome.verdict {
            Verdict::Submitted { accession } => Some(accession.clone()),
            _ => None,
        };
        (accession, outcome)
    }
}

/// The `ena-webin-cli` launcher. Each run is started inside the manifest's
/// directory because the tool writes its report to a fixed name in the
/// current directory.
#[derive(Clone)]
pub struct WebinCli {
    program: PathBuf,
    credentials: Credentials,
    context: String,
}

impl WebinCli {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_program(DEFAULT_PROGRAM, credentials)
    }

    pub fn with_program(program: impl Into<PathBuf>, credentials: Credentials) -> Self {
        Self {
            program: program.into(),
            credentials,
            context: "genome".to_string(),
        }
    }

    pub fn build_args(
        &self,
        manifest_file: &Path,
        mode: ToolMode,
        environment: Environment,
        limits: &ResourceLimits,
    ) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(heap) = &limits.java_max_heap {
            args.push(format!("-Xmx{heap}"));
        }
        args.extend([
            "-username".to_string(),
            self.credentials.username().to_string(),
            "-password".to_string(),
            self.credentials.password().to_string(),
            "-context".to_string(),
            self.context.clone(),
            "-manifest".to_string(),
            manifest_file.to_string_lossy().to_string(),
            mode.flag().to_string(),
        ]);
        if environment.is_dev() {
            args.push("-test".to_string());
        }
        if limits.use_ascp {
            args.push("-ascp".to_string());
        }
        args
    }
}

impl SubmissionTool for WebinCli {
    fn invoke(
        &self,
        manifest: &Path,
        mode: ToolMode,
        environment: Environment,
        limits: &ResourceLimits,
    ) -> Vec<LogEntry> {
        let dir = match manifest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let manifest_file = manifest.file_name().map(Path::new).unwrap_or(manifest);
        let args = self.build_args(manifest_file, mode, environment, limits);

        discard_report(dir);

        tracing::debug!(
            program = %self.program.display(),
            dir = %dir.display(),
            mode = mode.flag(),
            "running webin-cli"
        );
        match Command::new(&self.program).args(&args).current_dir(dir).output() {
            Ok(output) => {
                if !output.status.success() {
                    // The report carries the diagnostics; the exit code alone
                    // does not distinguish "already exists" from real failures.
                    tracing::debug!(
                        status = ?output.status.code(),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "webin-cli exited unsuccessfully"
                    );
                }
                read_report(dir)
            }
            Err(err) => {
                tracing::error!(program = %self.program.display(), "failed to start webin-cli: {err}");
                vec![LogEntry::no_report()]
            }
        }
    }
}
