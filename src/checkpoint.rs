use std::fs;
use std::io;

use crate::domain::ObjectKind;
use crate::error::LoaderError;
use crate::receipt::RegistrationResult;
use crate::store::WorkDir;

/// Saved registration outcomes, one JSON file per object kind.
///
/// A loaded result stands in for the remote call, so re-running the
/// pipeline never registers the same study or sample set twice.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    workdir: WorkDir,
}

impl CheckpointStore {
    pub fn new(workdir: WorkDir) -> Self {
        Self { workdir }
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    pub fn load(&self, kind: ObjectKind) -> Option<RegistrationResult> {
        let path = self.workdir.checkpoint_path(kind);
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(%kind, %path, "reading checkpoint failed: {err}");
                return None;
            }
        };

        let result: RegistrationResult = match serde_json::from_str(&content) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(%kind, %path, "ignoring malformed checkpoint: {err}");
                return None;
            }
        };

        if !result.is_accepted() {
            tracing::warn!(
                %kind,
                %path,
                errors = ?result.error_messages(),
                "checkpoint records a failed registration, registering again"
            );
            return None;
        }

        tracing::debug!(%kind, %path, "loaded checkpoint");
        Some(result)
    }

    pub fn save(&self, kind: ObjectKind, result: &RegistrationResult) -> Result<(), LoaderError> {
        let path = self.workdir.checkpoint_path(kind);
        let content = serde_json::to_vec_pretty(result)
            .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        WorkDir::write_bytes_atomic(&path, &content)?;
        tracing::debug!(%kind, %path, "saved checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::RegisteredObject;

    fn accepted() -> RegistrationResult {
        RegistrationResult {
            succeeded: true,
            received_at: None,
            submission_alias: Some("SUBMISSION-1".to_string()),
            submission_accession: Some("ERA1".to_string()),
            messages: Vec::new(),
            objects: vec![RegisteredObject::recovered("mag_study_1", ObjectKind::Study, "ERP1")],
            actions: vec!["ADD".to_string()],
        }
    }

    fn store() -> (tempfile::TempDir, CheckpointStore) {
        let temp = tempfile::tempdir().unwrap();
        let workdir = WorkDir::from_std(temp.path()).unwrap();
        (temp, CheckpointStore::new(workdir))
    }

    #[test]
    fn save_then_load() {
        let (_temp, store) = store();
        store.save(ObjectKind::Study, &accepted()).unwrap();
        assert_eq!(store.load(ObjectKind::Study), Some(accepted()));
        assert_eq!(store.load(ObjectKind::Sample), None);
    }

    #[test]
    fn malformed_or_empty_file_is_absent() {
        let (_temp, store) = store();
        let path = store.workdir().checkpoint_path(ObjectKind::Sample);
        fs::write(path.as_std_path(), "").unwrap();
        assert_eq!(store.load(ObjectKind::Sample), None);
        fs::write(path.as_std_path(), "{\"succeeded\": tr").unwrap();
        assert_eq!(store.load(ObjectKind::Sample), None);
    }

    #[test]
    fn failed_registration_is_absent() {
        let (_temp, store) = store();
        let mut failed = accepted();
        failed.submission_accession = None;
        store.save(ObjectKind::Study, &failed).unwrap();
        assert_eq!(store.load(ObjectKind::Study), None);
    }
}
