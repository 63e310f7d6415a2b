use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::manifest::{Artifact, DEFAULT_ASSEMBLY_TYPE};
use crate::metadata::{SampleDescriptor, SampleSet, Study, StudyLink};

pub const USERNAME_ENV: &str = "WEBIN_USERNAME";
pub const PASSWORD_ENV: &str = "WEBIN_PASSWORD";
pub const DEFAULT_ALIAS_PREFIX: &str = "mag";
pub const DEFAULT_CENTER_NAME: &str = "EMBL Heidelberg";
pub const STUDY_KEYWORD: &str = "TPA:assembly";
pub const NEW_STUDY_TYPE: &str = "Metagenomic assembly";
pub const DEFAULT_URL_LABEL: &str = "SPIRE";

/// Webin account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Parses a single `user:password` line. The password may contain `:`.
    pub fn parse(text: &str) -> Result<Self, LoaderError> {
        let line = text.lines().next().unwrap_or_default().trim();
        match line.split_once(':') {
            Some((user, password)) if !user.is_empty() && !password.is_empty() => {
                Ok(Self::new(user, password))
            }
            _ => Err(LoaderError::InvalidCredentials(
                "expected `user:password`".to_string(),
            )),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, LoaderError> {
        let content = fs::read_to_string(path).map_err(|err| {
            LoaderError::InvalidCredentials(format!("{}: {err}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn from_env() -> Result<Self, LoaderError> {
        let username = std::env::var(USERNAME_ENV).unwrap_or_default();
        let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            return Err(LoaderError::InvalidCredentials(format!(
                "set {USERNAME_ENV} and {PASSWORD_ENV} or pass --credentials"
            )));
        }
        Ok(Self::new(username, password))
    }

    pub fn resolve(path: Option<&Path>) -> Result<Self, LoaderError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StudyInput {
    pub study_id: String,
    pub study_name: String,
    #[serde(default)]
    pub accessions: Option<ProjectList>,
    #[serde(default)]
    pub alias_prefix: Option<String>,
    #[serde(default)]
    pub center_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Label of the `url` link, `SPIRE` when absent.
    #[serde(default)]
    pub url_label: Option<String>,
    #[serde(default)]
    pub assemblies: Vec<AssemblyEntry>,
}

/// Raw data projects, either `"PRJEB1,PRJEB2"` or a JSON list.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProjectList {
    Shorthand(String),
    List(Vec<String>),
}

impl ProjectList {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            ProjectList::Shorthand(value) => value.split(',').map(str::to_string).collect(),
            ProjectList::List(values) => values,
        };
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AssemblyEntry {
    pub sample_id: String,
    #[serde(default)]
    pub assembly_name: Option<String>,
    #[serde(default)]
    pub assembly_type: Option<String>,
    pub program: String,
    #[serde(default)]
    pub program_version: Option<String>,
    pub file_path: String,
    #[serde(default)]
    pub coverage: Option<f64>,
    /// `;`-separated biosample accessions.
    #[serde(default)]
    pub biosamples: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub study: Study,
    pub samples: Vec<SampleDescriptor>,
    /// Keyed by sample alias, the join key with the sample receipt.
    pub artifacts: BTreeMap<String, Artifact>,
}

impl ResolvedInput {
    pub fn sample_set(&self, study_accession: &str) -> SampleSet {
        SampleSet::new(study_accession, self.samples.clone())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &Path, limit: Option<usize>) -> Result<ResolvedInput, LoaderError> {
        let content = fs::read_to_string(path)
            .map_err(|_| LoaderError::ConfigRead(PathBuf::from(path)))?;
        let input: StudyInput = serde_json::from_str(&content)
            .map_err(|err| LoaderError::ConfigParse(err.to_string()))?;
        Self::resolve_config(input, limit)
    }

    pub fn resolve_config(
        input: StudyInput,
        limit: Option<usize>,
    ) -> Result<ResolvedInput, LoaderError> {
        let study_id = input.study_id.trim();
        if study_id.is_empty() {
            return Err(LoaderError::ConfigParse("study_id is empty".to_string()));
        }
        let prefix = input
            .alias_prefix
            .unwrap_or_else(|| DEFAULT_ALIAS_PREFIX.to_string());
        let raw_data_projects = input.accessions.map(ProjectList::into_vec).unwrap_or_default();

        let study = Study {
            alias: format!("{prefix}_study_{study_id}"),
            title: input.title.unwrap_or_else(|| {
                format!(
                    "TPA metagenomic analyses (assembly & MAGs) of project {}",
                    input.study_name
                )
            }),
            description: input
                .description
                .unwrap_or_else(|| default_description(&raw_data_projects)),
            center_name: input
                .center_name
                .unwrap_or_else(|| DEFAULT_CENTER_NAME.to_string()),
            keyword: STUDY_KEYWORD.to_string(),
            new_study_type: NEW_STUDY_TYPE.to_string(),
            url: input.url.map(|url| StudyLink {
                label: input
                    .url_label
                    .unwrap_or_else(|| DEFAULT_URL_LABEL.to_string()),
                url,
            }),
            raw_data_projects,
        };

        let take = limit.filter(|n| *n > 0).unwrap_or(usize::MAX);
        let mut samples = Vec::new();
        let mut artifacts = BTreeMap::new();
        let mut names = BTreeSet::new();
        for entry in input.assemblies.into_iter().take(take) {
            let sample_id = entry.sample_id.trim().to_string();
            if sample_id.is_empty() {
                return Err(LoaderError::ConfigParse(
                    "assembly entry without sample_id".to_string(),
                ));
            }
            let sample_alias = format!("{prefix}_sample_{sample_id}");
            if artifacts.contains_key(&sample_alias) {
                return Err(LoaderError::ConfigParse(format!(
                    "duplicate sample_id {sample_id}"
                )));
            }
            let biosamples: Vec<String> = entry
                .biosamples
                .as_deref()
                .unwrap_or_default()
                .split(';')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();

            let name = entry
                .assembly_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("{prefix}_assembly_{sample_id}"));
            check_artifact_name(&name)?;
            if !names.insert(name.clone()) {
                return Err(LoaderError::ConfigParse(format!(
                    "assembly name {name} is used by more than one sample"
                )));
            }

            samples.push(SampleDescriptor {
                alias: sample_alias.clone(),
                title: format!("Virtual sample {sample_alias}"),
                biosamples: biosamples.clone(),
            });
            artifacts.insert(
                sample_alias.clone(),
                Artifact {
                    name,
                    sample_alias,
                    assembly_type: entry
                        .assembly_type
                        .unwrap_or_else(|| DEFAULT_ASSEMBLY_TYPE.to_string()),
                    program: entry.program,
                    program_version: entry.program_version,
                    fasta: entry.file_path,
                    coverage: entry.coverage,
                    biosamples,
                },
            );
        }

        Ok(ResolvedInput {
            study,
            samples,
            artifacts,
        })
    }
}

/// An artifact name becomes a directory under the work dir and must stay
/// a single path component.
fn check_artifact_name(name: &str) -> Result<(), LoaderError> {
    if name.contains(['/', '\\']) || name.contains("..") || name == "." {
        return Err(LoaderError::ConfigParse(format!(
            "assembly name {name} is not a plain file name"
        )));
    }
    Ok(())
}

fn default_description(raw_data_projects: &[String]) -> String {
    let plural = if raw_data_projects.len() > 1 { "s" } else { "" };
    format!(
        "Third Party Annotations (TPA) derived from dataset{plural} {}. \
         This project bundles data on metagenomic assemblies and derived \
         metagenome-assembled genomes.",
        raw_data_projects.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sample_id: &str) -> AssemblyEntry {
        AssemblyEntry {
            sample_id: sample_id.to_string(),
            assembly_name: None,
            assembly_type: None,
            program: "megahit".to_string(),
            program_version: Some("1.2.9".to_string()),
            file_path: format!("/data/{sample_id}.fa.gz"),
            coverage: None,
            biosamples: Some("SAMEA1; SAMEA2;".to_string()),
        }
    }

    fn input(assemblies: Vec<AssemblyEntry>) -> StudyInput {
        StudyInput {
            study_id: "42".to_string(),
            study_name: "soil".to_string(),
            accessions: Some(ProjectList::Shorthand("PRJEB1, PRJEB2".to_string())),
            alias_prefix: None,
            center_name: None,
            title: None,
            description: None,
            url: None,
            url_label: None,
            assemblies,
        }
    }

    #[test]
    fn resolves_aliases_and_defaults() {
        let resolved = ConfigLoader::resolve_config(input(vec![entry("7")]), None).unwrap();
        assert_eq!(resolved.study.alias, "mag_study_42");
        assert_eq!(resolved.study.raw_data_projects, vec!["PRJEB1", "PRJEB2"]);
        assert!(resolved.study.description.contains("datasets PRJEB1, PRJEB2"));

        let artifact = &resolved.artifacts["mag_sample_7"];
        assert_eq!(artifact.name, "mag_assembly_7");
        assert_eq!(artifact.assembly_type, DEFAULT_ASSEMBLY_TYPE);
        assert_eq!(artifact.biosamples, vec!["SAMEA1", "SAMEA2"]);
        assert_eq!(resolved.samples[0].alias, "mag_sample_7");
    }

    #[test]
    fn limit_keeps_first_entries() {
        let resolved =
            ConfigLoader::resolve_config(input(vec![entry("1"), entry("2"), entry("3")]), Some(2))
                .unwrap();
        assert_eq!(resolved.samples.len(), 2);
        assert!(!resolved.artifacts.contains_key("mag_sample_3"));
    }

    #[test]
    fn duplicate_sample_is_rejected() {
        let err = ConfigLoader::resolve_config(input(vec![entry("1"), entry("1")]), None)
            .unwrap_err();
        assert!(matches!(err, LoaderError::ConfigParse(_)));
    }

    #[test]
    fn shared_assembly_name_is_rejected() {
        let mut first = entry("1");
        first.assembly_name = Some("asm".to_string());
        let mut second = entry("2");
        second.assembly_name = Some(" asm ".to_string());
        let err = ConfigLoader::resolve_config(input(vec![first, second]), None).unwrap_err();
        assert!(matches!(&err, LoaderError::ConfigParse(message) if message.contains("asm")));

        let mut explicit = entry("1");
        explicit.assembly_name = Some("mag_assembly_2".to_string());
        assert!(
            ConfigLoader::resolve_config(input(vec![explicit, entry("2")]), None).is_err()
        );
    }

    #[test]
    fn assembly_name_must_be_a_plain_file_name() {
        for name in ["../escape", "a/b", "..", "."] {
            let mut bad = entry("1");
            bad.assembly_name = Some(name.to_string());
            let err = ConfigLoader::resolve_config(input(vec![bad]), None).unwrap_err();
            assert!(matches!(err, LoaderError::ConfigParse(_)), "name={name}");
        }
        let mut sample_id_path = entry("x/../y");
        sample_id_path.assembly_name = None;
        assert!(ConfigLoader::resolve_config(input(vec![sample_id_path]), None).is_err());
    }

    #[test]
    fn credentials_parse_and_redact() {
        let creds = Credentials::parse("Webin-1:pa:ss\n").unwrap();
        assert_eq!(creds.username(), "Webin-1");
        assert_eq!(creds.password(), "pa:ss");
        assert!(!format!("{creds:?}").contains("pa:ss"));
        assert!(Credentials::parse("no-separator").is_err());
        assert!(Credentials::parse(":secret").is_err());
    }
}
