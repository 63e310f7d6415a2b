use std::fs;
use std::io;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::store::WorkDir;

pub const DEFAULT_ASSEMBLY_TYPE: &str = "primary metagenome";
pub const DEFAULT_COVERAGE: f64 = 10.0;
pub const PLATFORM: &str = "Illumina";
pub const MOLECULE_TYPE: &str = "genomic DNA";

/// One genome assembly waiting to be submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub sample_alias: String,
    pub assembly_type: String,
    pub program: String,
    pub program_version: Option<String>,
    pub fasta: String,
    pub coverage: Option<f64>,
    pub biosamples: Vec<String>,
}

impl Artifact {
    pub fn program_label(&self) -> String {
        match &self.program_version {
            Some(version) if !version.is_empty() => format!("{} v{version}", self.program),
            _ => self.program.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub study: String,
    pub sample: String,
    pub assembly_name: String,
    pub assembly_type: String,
    pub program: String,
    pub platform: String,
    pub molecule_type: String,
    pub fasta: String,
    pub coverage: f64,
}

impl Manifest {
    pub fn from_artifact(artifact: &Artifact, study_accession: &str, sample_accession: &str) -> Self {
        Self {
            study: study_accession.to_string(),
            sample: sample_accession.to_string(),
            assembly_name: artifact.name.clone(),
            assembly_type: artifact.assembly_type.clone(),
            program: artifact.program_label(),
            platform: PLATFORM.to_string(),
            molecule_type: MOLECULE_TYPE.to_string(),
            fasta: artifact.fasta.clone(),
            coverage: artifact.coverage.unwrap_or(DEFAULT_COVERAGE),
        }
    }

    pub fn to_text(&self) -> String {
        let coverage = self.coverage.to_string();
        let fields = [
            ("STUDY", self.study.as_str()),
            ("SAMPLE", self.sample.as_str()),
            ("ASSEMBLYNAME", self.assembly_name.as_str()),
            ("ASSEMBLY_TYPE", self.assembly_type.as_str()),
            ("PROGRAM", self.program.as_str()),
            ("PLATFORM", self.platform.as_str()),
            ("MOLECULETYPE", self.molecule_type.as_str()),
            ("FASTA", self.fasta.as_str()),
            ("COVERAGE", coverage.as_str()),
        ];
        let mut text = String::new();
        for (key, value) in fields {
            text.push_str(key);
            text.push_str("   ");
            text.push_str(value);
            text.push('\n');
        }
        text
    }

    /// Writes the manifest unless a file already exists at `path`.
    /// Returns whether a new file was written.
    pub fn write_if_absent(&self, path: &Utf8Path) -> Result<bool, LoaderError> {
        match fs::metadata(path.as_std_path()) {
            Ok(_) => {
                tracing::debug!(%path, "manifest exists, keeping it");
                Ok(false)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                WorkDir::write_bytes_atomic(path, self.to_text().as_bytes())?;
                tracing::debug!(%path, "wrote manifest");
                Ok(true)
            }
            Err(err) => Err(LoaderError::Filesystem(format!("stat {path}: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Artifact {
        Artifact {
            name: "mag_assembly_7".to_string(),
            sample_alias: "mag_sample_7".to_string(),
            assembly_type: DEFAULT_ASSEMBLY_TYPE.to_string(),
            program: "megahit".to_string(),
            program_version: Some("1.2.9".to_string()),
            fasta: "/data/7.fa.gz".to_string(),
            coverage: None,
            biosamples: vec!["SAMEA1".to_string()],
        }
    }

    #[test]
    fn renders_keys_in_order() {
        let text = Manifest::from_artifact(&artifact(), "ERP173187", "ERS31594040").to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "STUDY   ERP173187",
                "SAMPLE   ERS31594040",
                "ASSEMBLYNAME   mag_assembly_7",
                "ASSEMBLY_TYPE   primary metagenome",
                "PROGRAM   megahit v1.2.9",
                "PLATFORM   Illumina",
                "MOLECULETYPE   genomic DNA",
                "FASTA   /data/7.fa.gz",
                "COVERAGE   10",
            ]
        );
    }

    #[test]
    fn existing_manifest_is_not_rewritten() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("a.manifest.txt");
        fs::write(path.as_std_path(), "STUDY   hand-edited\n").unwrap();

        let written = Manifest::from_artifact(&artifact(), "ERP1", "ERS1")
            .write_if_absent(&path)
            .unwrap();
        assert!(!written);
        assert_eq!(
            fs::read_to_string(path.as_std_path()).unwrap(),
            "STUDY   hand-edited\n"
        );
    }

    #[test]
    fn absent_manifest_is_written() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("b.manifest.txt");
        let manifest = Manifest::from_artifact(&artifact(), "ERP1", "ERS1");
        assert!(manifest.write_if_absent(&path).unwrap());
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), manifest.to_text());
    }
}
