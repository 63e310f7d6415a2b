//! Registration receipts returned by the Webin drop-box endpoint.
//!
//! A receipt looks like
//!
//! ```text
//! <RECEIPT receiptDate="2025-06-05T09:17:27.485+01:00" submissionFile="SUBMISSION" success="true">
//!   <SAMPLE accession="ERS31594040" alias="mag_sample_177" status="PRIVATE" holdUntilDate="2025-12-31Z">
//!     <EXT_ID accession="SAMEA131616364" type="biosample"/>
//!   </SAMPLE>
//!   <SUBMISSION accession="ERA33153026" alias="SUBMISSION-05-06-2025-09:17:27:066"/>
//!   <MESSAGES>
//!     <INFO>All objects in this submission are set to private status (HOLD).</INFO>
//!   </MESSAGES>
//!   <ACTIONS>ADD</ACTIONS>
//!   <ACTIONS>HOLD</ACTIONS>
//! </RECEIPT>
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{ObjectKind, Severity};
use crate::error::LoaderError;

static RECEIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<RECEIPT\b([^>]*?)/?>").expect("receipt pattern"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w.:-]*)\s*=\s*"([^"]*)""#).expect("attribute pattern")
});
static STUDY_RE: LazyLock<Regex> =
    LazyLock::new(|| element_pattern(ObjectKind::Study.element_tag()));
static SAMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| element_pattern(ObjectKind::Sample.element_tag()));
static SUBMISSION_RE: LazyLock<Regex> = LazyLock::new(|| element_pattern("SUBMISSION"));
static EXT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<EXT_ID\b([^>]*?)/?>").expect("ext id pattern"));
static MESSAGES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<MESSAGES>(.*?)</MESSAGES>").expect("messages pattern"));
static MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<([A-Z]+)>(.*?)</[A-Z]+>").expect("message pattern"));
static ACTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ACTIONS>\s*([A-Z_]+)\s*</ACTIONS>").expect("actions pattern"));
static ALREADY_EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)alias:?\s*"([^"]+)".*?already exists.*?accession:?\s*"([^"]+)""#)
        .expect("already exists pattern")
});

fn element_pattern(tag: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{tag}\b([^>]*?)(?:/>|>(.*?)</{tag}>)")).expect("element pattern")
}

fn element_regex(kind: ObjectKind) -> &'static Regex {
    match kind {
        ObjectKind::Study => &STUDY_RE,
        ObjectKind::Sample => &SAMPLE_RE,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptMessage {
    pub severity: Severity,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredObject {
    pub alias: String,
    pub kind: ObjectKind,
    pub accession: Option<String>,
    pub external_accession: Option<String>,
    pub status: Option<String>,
    pub hold_until: Option<String>,
}

impl RegisteredObject {
    pub fn recovered(alias: &str, kind: ObjectKind, accession: &str) -> Self {
        Self {
            alias: alias.to_string(),
            kind,
            accession: Some(accession.to_string()),
            external_accession: None,
            status: None,
            hold_until: None,
        }
    }
}

/// Outcome of one remote registration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub succeeded: bool,
    pub received_at: Option<DateTime<FixedOffset>>,
    pub submission_alias: Option<String>,
    pub submission_accession: Option<String>,
    #[serde(default)]
    pub messages: Vec<ReceiptMessage>,
    #[serde(default)]
    pub objects: Vec<RegisteredObject>,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl RegistrationResult {
    /// The service has been seen to report `success="false"` alongside
    /// object data, so only the envelope accession decides acceptance.
    pub fn is_accepted(&self) -> bool {
        self.submission_accession.is_some()
    }

    pub fn object(&self, alias: &str) -> Option<&RegisteredObject> {
        self.objects.iter().find(|object| object.alias == alias)
    }

    pub fn objects_of(&self, kind: ObjectKind) -> impl Iterator<Item = &RegisteredObject> {
        self.objects.iter().filter(move |object| object.kind == kind)
    }

    /// `(accession, alias)` of every object that ended up with an accession.
    pub fn accessions(&self) -> Vec<(String, String)> {
        self.objects
            .iter()
            .filter_map(|object| {
                object
                    .accession
                    .as_ref()
                    .map(|accession| (accession.clone(), object.alias.clone()))
            })
            .collect()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|message| message.severity == Severity::Error)
            .map(|message| message.text.clone())
            .collect()
    }

    /// Adopts accessions reported in "already exists" rejections. The service
    /// is alias-keyed, so a repeated registration fails with the existing
    /// accession in the message instead of returning it as an object.
    pub fn recover_existing(&mut self, kind: ObjectKind) -> usize {
        let mut recovered = 0;
        for message in &self.messages {
            let Some(caps) = ALREADY_EXISTS_RE.captures(&message.text) else {
                continue;
            };
            let (alias, accession) = (&caps[1], &caps[2]);
            match self.objects.iter_mut().find(|object| object.alias == alias) {
                Some(object) if object.accession.is_some() => {}
                Some(object) => {
                    object.accession = Some(accession.to_string());
                    recovered += 1;
                    tracing::info!(%kind, alias, accession, "recovered accession of existing object");
                }
                None => {
                    self.objects
                        .push(RegisteredObject::recovered(alias, kind, accession));
                    recovered += 1;
                    tracing::info!(%kind, alias, accession, "recovered accession of existing object");
                }
            }
        }
        recovered
    }
}

/// Parses a receipt; `kind` selects which object elements are collected
/// (none for an envelope-only call).
pub fn parse_receipt(xml: &str, kind: Option<ObjectKind>) -> Result<RegistrationResult, LoaderError> {
    let root = RECEIPT_RE
        .captures(xml)
        .ok_or_else(|| LoaderError::MalformedReceipt(truncate(xml, 200)))?;
    let root_attrs = &root[1];

    let succeeded = attribute(root_attrs, "success")
        .map(|value| !value.eq_ignore_ascii_case("false"))
        .unwrap_or(false);
    let received_at = attribute(root_attrs, "receiptDate").and_then(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map_err(|err| tracing::warn!(receipt_date = %value, "unparseable receipt date: {err}"))
            .ok()
    });

    let (submission_alias, submission_accession) = match SUBMISSION_RE.captures(xml) {
        Some(caps) => (attribute(&caps[1], "alias"), attribute(&caps[1], "accession")),
        None => (None, None),
    };

    let objects = kind
        .map(|kind| parse_objects(xml, kind))
        .unwrap_or_default();

    let messages = MESSAGES_RE
        .captures(xml)
        .map(|block| {
            MESSAGE_RE
                .captures_iter(&block[1])
                .map(|caps| ReceiptMessage {
                    severity: Severity::from(&caps[1]),
                    text: unescape(caps[2].trim()),
                })
                .collect()
        })
        .unwrap_or_default();

    let actions = ACTIONS_RE
        .captures_iter(xml)
        .map(|caps| caps[1].to_string())
        .collect();

    Ok(RegistrationResult {
        succeeded,
        received_at,
        submission_alias,
        submission_accession,
        messages,
        objects,
        actions,
    })
}

pub fn parse_objects(xml: &str, kind: ObjectKind) -> Vec<RegisteredObject> {
    let mut objects: Vec<RegisteredObject> = Vec::new();
    for caps in element_regex(kind).captures_iter(xml) {
        let attrs = &caps[1];
        let Some(alias) = attribute(attrs, "alias") else {
            continue;
        };
        if objects.iter().any(|object| object.alias == alias) {
            tracing::warn!(%kind, alias, "duplicate alias in receipt, keeping the first");
            continue;
        }
        let external_accession = caps
            .get(2)
            .and_then(|body| EXT_ID_RE.captures(body.as_str()))
            .and_then(|ext| attribute(&ext[1], "accession"));
        objects.push(RegisteredObject {
            alias,
            kind,
            accession: attribute(attrs, "accession"),
            external_accession,
            status: attribute(attrs, "status"),
            hold_until: attribute(attrs, "holdUntilDate"),
        });
    }
    objects
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE
        .captures_iter(attrs)
        .find(|caps| &caps[1] == name)
        .map(|caps| unescape(&caps[2]))
        .filter(|value| !value.is_empty())
}

pub(crate) fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn truncate(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE_RECEIPT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<?xml-stylesheet type="text/xsl" href="receipt.xsl"?>
<RECEIPT receiptDate="2025-06-05T09:17:27.485+01:00" submissionFile="SUBMISSION" success="true">
     <SAMPLE accession="ERS31594040" alias="mag_sample_177" status="PRIVATE" holdUntilDate="2025-12-31Z">
          <EXT_ID accession="SAMEA131616364" type="biosample"/>
     </SAMPLE>
     <SAMPLE accession="ERS31594041" alias="mag_sample_172" status="PRIVATE" holdUntilDate="2025-12-31Z">
          <EXT_ID accession="SAMEA131616365" type="biosample"/>
     </SAMPLE>
     <SUBMISSION accession="ERA33153026" alias="SUBMISSION-05-06-2025-09:17:27:066"/>
     <MESSAGES>
          <INFO>All objects in this submission are set to private status (HOLD).</INFO>
          <INFO>This submission is a TEST submission and will be discarded within 24 hours</INFO>
     </MESSAGES>
     <ACTIONS>ADD</ACTIONS>
     <ACTIONS>HOLD</ACTIONS>
</RECEIPT>"#;

    #[test]
    fn parses_sample_receipt() {
        let result = parse_receipt(SAMPLE_RECEIPT, Some(ObjectKind::Sample)).unwrap();
        assert!(result.succeeded);
        assert!(result.is_accepted());
        assert_eq!(result.submission_accession.as_deref(), Some("ERA33153026"));
        assert_eq!(result.objects.len(), 2);
        assert_eq!(result.objects[0].alias, "mag_sample_177");
        assert_eq!(result.objects[0].accession.as_deref(), Some("ERS31594040"));
        assert_eq!(
            result.objects[1].external_accession.as_deref(),
            Some("SAMEA131616365")
        );
        assert_eq!(result.objects[1].hold_until.as_deref(), Some("2025-12-31Z"));
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].severity, Severity::Info);
        assert_eq!(result.actions, vec!["ADD", "HOLD"]);
        assert!(result.received_at.is_some());
    }

    #[test]
    fn envelope_only_receipt_has_no_objects() {
        let result = parse_receipt(SAMPLE_RECEIPT, None).unwrap();
        assert!(result.objects.is_empty());
        assert!(result.is_accepted());
    }

    #[test]
    fn missing_submission_accession_is_not_accepted() {
        let xml = r#"<RECEIPT receiptDate="2025-08-13T13:55:51.759+01:00" success="true">
            <SUBMISSION alias="SUBMISSION-13-08-2025"/>
            <MESSAGES><ERROR>Failed to submit samples to BioSamples</ERROR></MESSAGES>
        </RECEIPT>"#;
        let result = parse_receipt(xml, Some(ObjectKind::Sample)).unwrap();
        assert!(result.succeeded);
        assert!(!result.is_accepted());
        assert_eq!(result.error_messages(), vec!["Failed to submit samples to BioSamples"]);
    }

    #[test]
    fn rejects_non_receipt_bodies() {
        let err = parse_receipt("<html>Service unavailable</html>", None).unwrap_err();
        assert_matches!(err, LoaderError::MalformedReceipt(_));
    }

    #[test]
    fn recovers_accession_from_rejection_message() {
        let xml = r#"<RECEIPT receiptDate="2025-06-05T09:17:27.485+01:00" success="false">
            <SAMPLE alias="mag_sample_9" status="PRIVATE"/>
            <MESSAGES>
              <ERROR>In sample, alias: &quot;mag_sample_9&quot;. The object being added already exists in the submission account with accession: &quot;ERS1000009&quot;.</ERROR>
              <ERROR>In sample, alias: "mag_sample_10". The object being added already exists in the submission account with accession: "ERS1000010".</ERROR>
            </MESSAGES>
        </RECEIPT>"#;
        let mut result = parse_receipt(xml, Some(ObjectKind::Sample)).unwrap();
        assert_eq!(result.objects.len(), 1);

        let recovered = result.recover_existing(ObjectKind::Sample);

        assert_eq!(recovered, 2);
        assert_eq!(
            result.object("mag_sample_9").unwrap().accession.as_deref(),
            Some("ERS1000009")
        );
        let added = result.object("mag_sample_10").unwrap();
        assert_eq!(added.accession.as_deref(), Some("ERS1000010"));
        assert_eq!(added.kind, ObjectKind::Sample);
    }

    #[test]
    fn recovery_keeps_issued_accessions() {
        let mut result = parse_receipt(SAMPLE_RECEIPT, Some(ObjectKind::Sample)).unwrap();
        result.messages.push(ReceiptMessage {
            severity: Severity::Error,
            text: r#"alias "mag_sample_177" already exists with accession "ERS0""#.to_string(),
        });
        assert_eq!(result.recover_existing(ObjectKind::Sample), 0);
        assert_eq!(
            result.object("mag_sample_177").unwrap().accession.as_deref(),
            Some("ERS31594040")
        );
    }
}
