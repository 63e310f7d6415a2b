use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::ObjectKind;
use crate::error::LoaderError;

pub const ASSEMBLIES_DIR: &str = "assemblies";
pub const ACCESSION_LOG: &str = "accessions.tsv";
pub const FAILURE_LOG: &str = "failures.tsv";

/// Layout of a pipeline working directory.
///
/// ```text
/// <root>/study.json, sample.json           checkpoints
/// <root>/submission.xml, <kind>.xml, ...   audit copies
/// <root>/accessions.tsv, failures.tsv      batch logs
/// <root>/assemblies/<name>/                one subtree per artifact
/// ```
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: Utf8PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_std(root: &std::path::Path) -> Result<Self, LoaderError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf())
            .map_err(|_| LoaderError::Filesystem("invalid work directory path".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn checkpoint_path(&self, kind: ObjectKind) -> Utf8PathBuf {
        self.root.join(format!("{}.json", kind.as_str()))
    }

    pub fn document_path(&self, stem: &str) -> Utf8PathBuf {
        self.root.join(format!("{stem}.xml"))
    }

    pub fn assembly_dir(&self, name: &str) -> Utf8PathBuf {
        self.root.join(ASSEMBLIES_DIR).join(name)
    }

    pub fn manifest_path(&self, name: &str) -> Utf8PathBuf {
        self.assembly_dir(name).join(format!("{name}.manifest.txt"))
    }

    pub fn accession_log_path(&self) -> Utf8PathBuf {
        self.root.join(ACCESSION_LOG)
    }

    pub fn failure_log_path(&self) -> Utf8PathBuf {
        self.root.join(FAILURE_LOG)
    }

    pub fn ensure_root(&self) -> Result<(), LoaderError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| LoaderError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), LoaderError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| LoaderError::Filesystem(format!("create {path}: {err}")))
    }

    /// Writes `content` to a temp file next to `path` and renames it into
    /// place, so readers see either the old file or the complete new one.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), LoaderError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Self::ensure_dir(parent)?;
        let mut temp = Builder::new()
            .prefix(".webin-loader")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, content)
            .map_err(|err| LoaderError::Filesystem(format!("write {path}: {err}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| LoaderError::Filesystem(format!("sync {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| LoaderError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let work = WorkDir::new("work");
        assert!(work.checkpoint_path(ObjectKind::Sample).ends_with("sample.json"));
        assert_eq!(
            work.manifest_path("asm_1").as_str(),
            "work/assemblies/asm_1/asm_1.manifest.txt"
        );
        assert!(work.accession_log_path().ends_with("accessions.tsv"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let work = WorkDir::from_std(temp.path()).unwrap();
        let path = work.root().join("nested").join("file.txt");

        WorkDir::write_bytes_atomic(&path, b"first").unwrap();
        WorkDir::write_bytes_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(path.as_std_path()).unwrap(), "second");
        let leftovers = std::fs::read_dir(path.parent().unwrap().as_std_path())
            .unwrap()
            .count();
        assert_eq!(leftovers, 1);
    }
}
