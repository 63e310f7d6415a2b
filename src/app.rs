use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::accession_log::AccessionLog;
use crate::checkpoint::CheckpointStore;
use crate::config::ResolvedInput;
use crate::domain::ObjectKind;
use crate::error::LoaderError;
use crate::receipt::{RegisteredObject, RegistrationResult};
use crate::store::WorkDir;
use crate::submission::{
    RegistrationClient, RegistrationRequest, RegistrationTransport, SubmissionParams,
};
use crate::upload::{self, ArtifactSubmitter, BatchItem};
use crate::webin::{ResourceLimits, SubmissionTool};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub params: SubmissionParams,
    pub workers: usize,
    pub limits: ResourceLimits,
    pub validate_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            params: SubmissionParams::default(),
            workers: 1,
            limits: ResourceLimits::default(),
            validate_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub study_accession: String,
    pub samples: usize,
    /// Artifacts skipped because an earlier run already submitted them.
    pub skipped: usize,
    pub submitted: usize,
    pub validated: usize,
    pub failed: usize,
    pub items: Vec<BatchItem>,
    pub accession_log: Utf8PathBuf,
    pub failure_log: Utf8PathBuf,
}

impl PipelineReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: RegistrationTransport, W: SubmissionTool> {
    workdir: WorkDir,
    registration: RegistrationClient<T>,
    tool: Arc<W>,
}

impl<T, W> App<T, W>
where
    T: RegistrationTransport,
    W: SubmissionTool + 'static,
{
    pub fn new(workdir: WorkDir, transport: T, tool: W) -> Self {
        let checkpoints = CheckpointStore::new(workdir.clone());
        Self {
            workdir,
            registration: RegistrationClient::new(transport, checkpoints),
            tool: Arc::new(tool),
        }
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    /// Registers the study and its samples, then validates and submits every
    /// artifact not yet marked done.
    pub fn run(
        &self,
        input: &ResolvedInput,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineReport, LoaderError> {
        self.workdir.ensure_root()?;
        let started = Instant::now();

        sink.event(ProgressEvent {
            message: format!("phase=Register; study {}", input.study.alias),
            elapsed: None,
        });
        let study = self
            .registration
            .register(&RegistrationRequest::new(&input.study, options.params))?;
        ensure_accepted(ObjectKind::Study, &study)?;
        let study_accession = study
            .objects_of(ObjectKind::Study)
            .find_map(|object| object.accession.clone())
            .ok_or_else(|| LoaderError::MissingAccession {
                kind: ObjectKind::Study,
                alias: input.study.alias.clone(),
            })?;
        tracing::info!(study = %study_accession, "study registered");

        sink.event(ProgressEvent {
            message: format!("phase=Register; {} samples", input.samples.len()),
            elapsed: Some(started.elapsed()),
        });
        let sample_set = input.sample_set(&study_accession);
        let samples = self
            .registration
            .register(&RegistrationRequest::new(&sample_set, options.params))?;
        ensure_accepted(ObjectKind::Sample, &samples)?;
        let registered: Vec<RegisteredObject> =
            samples.objects_of(ObjectKind::Sample).cloned().collect();
        tracing::info!(samples = registered.len(), "samples registered");

        let pairs = upload::pair_artifacts(&registered, &input.artifacts)?;
        let manifests = upload::prepare_manifests(&study_accession, &pairs, &self.workdir)?;
        let skipped = pairs.len() - manifests.len();
        let total = manifests.len();
        sink.event(ProgressEvent {
            message: format!("phase=Upload; {total} artifacts, {skipped} already done"),
            elapsed: Some(started.elapsed()),
        });

        let submitter = ArtifactSubmitter::new(
            Arc::clone(&self.tool),
            options.params.environment,
            options.limits.clone(),
        )
        .validate_only(options.validate_only);
        let mut log = AccessionLog::open(&self.workdir)?;
        let batch = upload::run(manifests, Arc::new(submitter), options.workers)?;

        let mut report = PipelineReport {
            study_accession,
            samples: registered.len(),
            skipped,
            submitted: 0,
            validated: 0,
            failed: 0,
            items: Vec::with_capacity(total),
            accession_log: log.accession_path().to_path_buf(),
            failure_log: log.failure_path().to_path_buf(),
        };
        for item in batch {
            log.record(&item)?;
            let status = if item.accession.is_some() {
                report.submitted += 1;
                "submitted"
            } else if item.is_failure() {
                report.failed += 1;
                "failed"
            } else {
                report.validated += 1;
                "validated"
            };
            tracing::info!(
                progress = %format!("{}/{total}", item.index + 1),
                manifest = %item.manifest,
                status,
                "artifact processed"
            );
            sink.event(ProgressEvent {
                message: format!("{}/{total} {status} {}", item.index + 1, item.manifest),
                elapsed: Some(started.elapsed()),
            });
            report.items.push(item);
        }

        tracing::info!(
            submitted = report.submitted,
            validated = report.validated,
            failed = report.failed,
            skipped = report.skipped,
            "batch finished"
        );
        Ok(report)
    }

    pub fn release(&self, params: &SubmissionParams) -> Result<RegistrationResult, LoaderError> {
        let result = self.registration.release(params)?;
        if !result.is_accepted() {
            tracing::warn!(errors = ?result.error_messages(), "release not accepted");
        }
        Ok(result)
    }
}

fn ensure_accepted(kind: ObjectKind, result: &RegistrationResult) -> Result<(), LoaderError> {
    if result.is_accepted() {
        return Ok(());
    }
    let mut messages = result.error_messages();
    if messages.is_empty() {
        messages.push("receipt carries no submission accession".to_string());
    }
    Err(LoaderError::RegistrationRejected { kind, messages })
}
