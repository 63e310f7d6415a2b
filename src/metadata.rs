//! Registrable metadata documents.
//!
//! The registration client only sees [`SubmissionDocument`]; each document
//! knows its protocol key, renders itself as XML and parses its own objects
//! out of a receipt.

use std::fmt::Write as _;

use serde::Serialize;

use crate::domain::ObjectKind;
use crate::error::LoaderError;
use crate::receipt::{RegistrationResult, parse_receipt};

/// NCBI taxonomy id for "metagenome".
pub const METAGENOME_TAXON_ID: &str = "256318";
const MISSING_THIRD_PARTY: &str = "missing: third party data";

pub trait SubmissionDocument {
    fn kind(&self) -> ObjectKind;

    fn to_document(&self) -> String;

    fn parse_response(&self, receipt: &str) -> Result<RegistrationResult, LoaderError> {
        parse_receipt(receipt, Some(self.kind()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Study {
    pub alias: String,
    pub title: String,
    pub description: String,
    pub center_name: String,
    pub keyword: String,
    pub new_study_type: String,
    pub url: Option<StudyLink>,
    pub raw_data_projects: Vec<String>,
}

/// A labelled web link shown on the study page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyLink {
    pub label: String,
    pub url: String,
}

impl SubmissionDocument for Study {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Study
    }

    fn to_document(&self) -> String {
        let mut links = String::new();
        if let Some(link) = &self.url {
            let _ = write!(
                links,
                "<STUDY_LINK><URL_LINK><LABEL>{}</LABEL><URL>{}</URL></URL_LINK></STUDY_LINK>",
                escape(&link.label),
                escape(&link.url)
            );
        }
        for project in &self.raw_data_projects {
            let _ = write!(
                links,
                "<STUDY_LINK><XREF_LINK><DB>ENA-SUBMISSION</DB><ID>{}</ID></XREF_LINK></STUDY_LINK>",
                escape(project)
            );
        }

        format!(
            concat!(
                "<STUDY_SET><STUDY alias=\"{alias}\" center_name=\"{center}\">",
                "<DESCRIPTOR><STUDY_TITLE>{title}</STUDY_TITLE>",
                "<STUDY_TYPE existing_study_type=\"Other\" new_study_type=\"{study_type}\"/>",
                "<STUDY_DESCRIPTION>{description}</STUDY_DESCRIPTION></DESCRIPTOR>",
                "<STUDY_LINKS>{links}</STUDY_LINKS>",
                "<STUDY_ATTRIBUTES><STUDY_ATTRIBUTE><TAG>study keyword</TAG>",
                "<VALUE>{keyword}</VALUE></STUDY_ATTRIBUTE></STUDY_ATTRIBUTES>",
                "</STUDY></STUDY_SET>"
            ),
            alias = escape(&self.alias),
            center = escape(&self.center_name),
            title = escape(&self.title),
            study_type = escape(&self.new_study_type),
            description = escape(&self.description),
            links = links,
            keyword = escape(&self.keyword),
        )
    }
}

/// A virtual sample standing for the biosamples an assembly was built from.
#[derive(Debug, Clone, Serialize)]
pub struct SampleDescriptor {
    pub alias: String,
    pub title: String,
    pub biosamples: Vec<String>,
}

impl SampleDescriptor {
    fn to_element(&self, study_accession: &str) -> String {
        let mut links = String::new();
        for biosample in &self.biosamples {
            let _ = write!(
                links,
                "<SAMPLE_LINK><XREF_LINK><DB>BIOSAMPLE</DB><ID>{}</ID></XREF_LINK></SAMPLE_LINK>",
                escape(biosample)
            );
        }
        let _ = write!(
            links,
            "<SAMPLE_LINK><XREF_LINK><DB>BIOPROJECT</DB><ID>{}</ID></XREF_LINK></SAMPLE_LINK>",
            escape(study_accession)
        );

        let attributes = ["collection date", "geographic location (country and/or sea)"]
            .iter()
            .map(|tag| {
                format!(
                    "<SAMPLE_ATTRIBUTE><TAG>{tag}</TAG><VALUE>{MISSING_THIRD_PARTY}</VALUE></SAMPLE_ATTRIBUTE>"
                )
            })
            .collect::<String>();

        format!(
            concat!(
                "<SAMPLE alias=\"{alias}\"><TITLE>{title}</TITLE>",
                "<SAMPLE_NAME><TAXON_ID>{taxon}</TAXON_ID></SAMPLE_NAME>",
                "<DESCRIPTION>{description}</DESCRIPTION>",
                "<SAMPLE_LINKS>{links}</SAMPLE_LINKS>",
                "<SAMPLE_ATTRIBUTES>{attributes}</SAMPLE_ATTRIBUTES></SAMPLE>"
            ),
            alias = escape(&self.alias),
            title = escape(&self.title),
            taxon = METAGENOME_TAXON_ID,
            description = escape(&format!(
                "Virtual sample derived from {}.",
                self.biosamples.join(", ")
            )),
            links = links,
            attributes = attributes,
        )
    }
}

/// Samples are registered in one call and link back to the study accession,
/// so a set can only be built once the study is registered.
#[derive(Debug, Clone, Serialize)]
pub struct SampleSet {
    pub study_accession: String,
    pub samples: Vec<SampleDescriptor>,
}

impl SampleSet {
    pub fn new(study_accession: impl Into<String>, samples: Vec<SampleDescriptor>) -> Self {
        Self {
            study_accession: study_accession.into(),
            samples,
        }
    }
}

impl SubmissionDocument for SampleSet {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Sample
    }

    fn to_document(&self) -> String {
        let body = self
            .samples
            .iter()
            .map(|sample| sample.to_element(&self.study_accession))
            .collect::<String>();
        format!("<SAMPLE_SET>{body}</SAMPLE_SET>")
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
