use std::fs::{File, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::LoaderError;
use crate::store::WorkDir;
use crate::upload::BatchItem;

/// Append-only TSV logs of submitted accessions and per-artifact failures.
/// Every line is flushed as soon as it is written.
pub struct AccessionLog {
    accessions: File,
    failures: File,
    accession_path: Utf8PathBuf,
    failure_path: Utf8PathBuf,
}

impl AccessionLog {
    pub fn open(workdir: &WorkDir) -> Result<Self, LoaderError> {
        let accession_path = workdir.accession_log_path();
        let failure_path = workdir.failure_log_path();
        Ok(Self {
            accessions: open_append(&accession_path)?,
            failures: open_append(&failure_path)?,
            accession_path,
            failure_path,
        })
    }

    pub fn accession_path(&self) -> &Utf8Path {
        &self.accession_path
    }

    pub fn failure_path(&self) -> &Utf8Path {
        &self.failure_path
    }

    pub fn record_success(&mut self, accession: &str, manifest: &Utf8Path) -> Result<(), LoaderError> {
        let line = format!("{}\t{}\n", clean(accession), clean(manifest.as_str()));
        append(&mut self.accessions, &self.accession_path, &line)
    }

    /// One line per diagnostic message of the failed artifact.
    pub fn record_failure(&mut self, item: &BatchItem) -> Result<(), LoaderError> {
        let mut lines = String::new();
        for entry in &item.messages {
            let line = entry
                .line
                .map(|line| line.to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                clean(item.manifest.as_str()),
                line,
                entry.severity,
                clean(&entry.message)
            ));
        }
        if item.messages.is_empty() {
            lines.push_str(&format!(
                "{}\t-\tERROR\tno diagnostics reported\n",
                clean(item.manifest.as_str())
            ));
        }
        append(&mut self.failures, &self.failure_path, &lines)
    }

    pub fn record(&mut self, item: &BatchItem) -> Result<(), LoaderError> {
        match &item.accession {
            Some(accession) => self.record_success(accession, &item.manifest),
            None if item.is_failure() => self.record_failure(item),
            None => Ok(()),
        }
    }
}

fn open_append(path: &Utf8Path) -> Result<File, LoaderError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| LoaderError::Filesystem(format!("open {path}: {err}")))
}

fn append(file: &mut File, path: &Utf8Path, text: &str) -> Result<(), LoaderError> {
    file.write_all(text.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|err| LoaderError::Filesystem(format!("append {path}: {err}")))
}

fn clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
