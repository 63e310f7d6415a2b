use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{Environment, ObjectKind, Severity};
use crate::error::LoaderError;
use crate::manifest::{Artifact, Manifest};
use crate::receipt::RegisteredObject;
use crate::sentinel;
use crate::store::WorkDir;
use crate::webin::{LogEntry, ResourceLimits, SubmissionTool};

/// Joins registered samples with their artifacts by alias.
/// Returns `(sample accession, artifact)` pairs in receipt order.
pub fn pair_artifacts(
    samples: &[RegisteredObject],
    artifacts: &BTreeMap<String, Artifact>,
) -> Result<Vec<(String, Artifact)>, LoaderError> {
    samples
        .iter()
        .map(|sample| {
            let artifact = artifacts
                .get(&sample.alias)
                .ok_or_else(|| LoaderError::MissingArtifact(sample.alias.clone()))?;
            let accession =
                sample
                    .accession
                    .clone()
                    .ok_or_else(|| LoaderError::MissingAccession {
                        kind: ObjectKind::Sample,
                        alias: sample.alias.clone(),
                    })?;
            Ok((accession, artifact.clone()))
        })
        .collect()
}

/// Writes missing manifests and returns the ones still to be processed.
/// Artifacts whose directory carries a sentinel are skipped. Two artifacts
/// resolving to the same directory are a configuration error.
pub fn prepare_manifests(
    study_accession: &str,
    pairs: &[(String, Artifact)],
    workdir: &WorkDir,
) -> Result<Vec<Utf8PathBuf>, LoaderError> {
    let mut claimed = BTreeSet::new();
    for (_, artifact) in pairs {
        let dir = workdir.assembly_dir(&artifact.name);
        if !claimed.insert(dir.clone()) {
            return Err(LoaderError::DuplicateArtifact(dir.into_string()));
        }
    }

    let mut manifests = Vec::with_capacity(pairs.len());
    for (sample_accession, artifact) in pairs {
        let dir = workdir.assembly_dir(&artifact.name);
        if sentinel::is_done(&dir) {
            tracing::info!(artifact = %artifact.name, "already submitted, skipping");
            continue;
        }
        WorkDir::ensure_dir(&dir)?;
        let path = workdir.manifest_path(&artifact.name);
        Manifest::from_artifact(artifact, study_accession, sample_accession)
            .write_if_absent(&path)?;
        manifests.push(path);
    }
    Ok(manifests)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactOutcome {
    pub accession: Option<String>,
    /// Set for a validate-only pass, which is neither submitted nor failed.
    pub validated: bool,
    pub messages: Vec<LogEntry>,
}

impl ArtifactOutcome {
    pub fn submitted(accession: impl Into<String>) -> Self {
        Self {
            accession: Some(accession.into()),
            ..Self::default()
        }
    }

    pub fn validated() -> Self {
        Self {
            validated: true,
            ..Self::default()
        }
    }

    pub fn failed(messages: Vec<LogEntry>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

pub trait ManifestProcessor: Send + Sync {
    fn process(&self, manifest: &Utf8Path) -> ArtifactOutcome;
}

impl<F> ManifestProcessor for F
where
    F: Fn(&Utf8Path) -> ArtifactOutcome + Send + Sync,
{
    fn process(&self, manifest: &Utf8Path) -> ArtifactOutcome {
        self(manifest)
    }
}

/// Validates, submits and marks one artifact. Touches nothing outside the
/// manifest's own directory.
pub struct ArtifactSubmitter<W: SubmissionTool> {
    tool: Arc<W>,
    environment: Environment,
    limits: ResourceLimits,
    validate_only: bool,
}

impl<W: SubmissionTool> ArtifactSubmitter<W> {
    pub fn new(tool: Arc<W>, environment: Environment, limits: ResourceLimits) -> Self {
        Self {
            tool,
            environment,
            limits,
            validate_only: false,
        }
    }

    pub fn validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }
}

impl<W: SubmissionTool> ManifestProcessor for ArtifactSubmitter<W> {
    fn process(&self, manifest: &Utf8Path) -> ArtifactOutcome {
        let (valid, outcome) =
            self.tool
                .validate(manifest.as_std_path(), self.environment, &self.limits);
        if !valid {
            tracing::warn!(%manifest, entries = outcome.entries.len(), "validation failed");
            return ArtifactOutcome::failed(outcome.entries);
        }
        if self.validate_only {
            tracing::info!(%manifest, "validated");
            return ArtifactOutcome::validated();
        }

        let (accession, outcome) =
            self.tool
                .submit(manifest.as_std_path(), self.environment, &self.limits);
        match accession {
            Some(accession) => {
                let dir = manifest.parent().unwrap_or(Utf8Path::new("."));
                if let Err(err) = sentinel::mark_done(dir) {
                    // The accession stands; a rerun recovers it as "already exists".
                    tracing::error!(%manifest, "failed to mark artifact done: {err}");
                }
                tracing::info!(%manifest, %accession, "submitted");
                ArtifactOutcome::submitted(accession)
            }
            None => {
                tracing::warn!(%manifest, entries = outcome.entries.len(), "submission failed");
                ArtifactOutcome::failed(outcome.entries)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub manifest: Utf8PathBuf,
    pub accession: Option<String>,
    pub validated: bool,
    pub messages: Vec<LogEntry>,
}

impl BatchItem {
    fn new(index: usize, manifest: Utf8PathBuf, outcome: ArtifactOutcome) -> Self {
        Self {
            index,
            manifest,
            accession: outcome.accession,
            validated: outcome.validated,
            messages: outcome.messages,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.accession.is_none() && !self.validated
    }
}

type Job = (usize, Utf8PathBuf);

/// Results of a batch in input order, produced lazily.
pub struct BatchRun {
    total: usize,
    inner: BatchInner,
}

enum BatchInner {
    Sequential {
        manifests: std::iter::Enumerate<std::vec::IntoIter<Utf8PathBuf>>,
        processor: Arc<dyn ManifestProcessor>,
    },
    Pooled(Pool),
}

struct Pool {
    manifests: Vec<Utf8PathBuf>,
    jobs: Arc<Mutex<Receiver<Job>>>,
    results: Receiver<(usize, ArtifactOutcome)>,
    pending: BTreeMap<usize, ArtifactOutcome>,
    disconnected: bool,
    next: usize,
    handles: Vec<JoinHandle<()>>,
}

/// Processes `manifests` with `workers` threads. With one worker or fewer
/// each manifest is handled on the caller's thread as the iterator advances.
pub fn run<P>(
    manifests: Vec<Utf8PathBuf>,
    processor: Arc<P>,
    workers: usize,
) -> Result<BatchRun, LoaderError>
where
    P: ManifestProcessor + 'static,
{
    let total = manifests.len();
    let processor: Arc<dyn ManifestProcessor> = processor;
    if workers <= 1 || total <= 1 {
        return Ok(BatchRun {
            total,
            inner: BatchInner::Sequential {
                manifests: manifests.into_iter().enumerate(),
                processor,
            },
        });
    }

    let (job_tx, job_rx) = mpsc::channel::<Job>();
    let (result_tx, result_rx) = mpsc::channel();
    let jobs = Arc::new(Mutex::new(job_rx));
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers.min(total) {
        let jobs = Arc::clone(&jobs);
        let results = result_tx.clone();
        let processor = Arc::clone(&processor);
        let spawned = thread::Builder::new()
            .name(format!("webin-worker-{worker}"))
            .spawn(move || worker_loop(worker, jobs, results, processor));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                drop(job_tx);
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(LoaderError::WorkerPool(format!(
                    "failed to spawn worker {worker}: {err}"
                )));
            }
        }
    }
    drop(result_tx);

    enqueue(&job_tx, &manifests)?;
    drop(job_tx);

    Ok(BatchRun {
        total,
        inner: BatchInner::Pooled(Pool {
            manifests,
            jobs,
            results: result_rx,
            pending: BTreeMap::new(),
            disconnected: false,
            next: 0,
            handles,
        }),
    })
}

fn enqueue(jobs: &Sender<Job>, manifests: &[Utf8PathBuf]) -> Result<(), LoaderError> {
    for (index, manifest) in manifests.iter().enumerate() {
        jobs.send((index, manifest.clone()))
            .map_err(|_| LoaderError::WorkerPool("all workers exited".to_string()))?;
    }
    Ok(())
}

fn worker_loop(
    worker: usize,
    jobs: Arc<Mutex<Receiver<Job>>>,
    results: Sender<(usize, ArtifactOutcome)>,
    processor: Arc<dyn ManifestProcessor>,
) {
    loop {
        let job = match jobs.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => break,
        };
        let Ok((index, manifest)) = job else {
            break;
        };
        tracing::debug!(worker, %manifest, "processing");
        let outcome = process_guarded(processor.as_ref(), &manifest, worker);
        if results.send((index, outcome)).is_err() {
            break;
        }
    }
}

/// A panicking processor fails its own item instead of the whole batch.
fn process_guarded(
    processor: &dyn ManifestProcessor,
    manifest: &Utf8Path,
    worker: usize,
) -> ArtifactOutcome {
    panic::catch_unwind(AssertUnwindSafe(|| processor.process(manifest))).unwrap_or_else(|_| {
        tracing::error!(worker, %manifest, "processor panicked");
        ArtifactOutcome::failed(vec![worker_lost(manifest)])
    })
}

fn worker_lost(manifest: &Utf8Path) -> LogEntry {
    LogEntry::new(
        None,
        Severity::Error,
        format!("worker stopped before reporting a result for {manifest}"),
    )
}

impl BatchRun {
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for BatchRun {
    type Item = BatchItem;

    fn next(&mut self) -> Option<BatchItem> {
        match &mut self.inner {
            BatchInner::Sequential {
                manifests,
                processor,
            } => {
                let (index, manifest) = manifests.next()?;
                let outcome = process_guarded(processor.as_ref(), &manifest, 0);
                Some(BatchItem::new(index, manifest, outcome))
            }
            BatchInner::Pooled(pool) => pool.next_item(),
        }
    }
}

impl Pool {
    fn next_item(&mut self) -> Option<BatchItem> {
        let index = self.next;
        let manifest = self.manifests.get(index)?.clone();
        while !self.disconnected && !self.pending.contains_key(&index) {
            match self.results.recv() {
                Ok((done, outcome)) => {
                    self.pending.insert(done, outcome);
                }
                Err(_) => self.disconnected = true,
            }
        }
        let outcome = self
            .pending
            .remove(&index)
            .unwrap_or_else(|| ArtifactOutcome::failed(vec![worker_lost(&manifest)]));
        self.next += 1;
        if self.next == self.manifests.len() {
            self.join();
        }
        Some(BatchItem::new(index, manifest, outcome))
    }

    fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Drain queued jobs so workers stop after their current manifest.
        if let Ok(receiver) = self.jobs.lock() {
            while receiver.try_recv().is_ok() {}
        }
        self.join();
    }
}
