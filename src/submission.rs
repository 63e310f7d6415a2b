use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::checkpoint::CheckpointStore;
use crate::config::Credentials;
use crate::domain::{Environment, HoldDate};
use crate::error::LoaderError;
use crate::metadata::{SubmissionDocument, escape};
use crate::receipt::{RegistrationResult, parse_receipt};
use crate::store::WorkDir;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DROP_BOX_PATH: &str = "ena/submit/drop-box/submit/";

pub fn endpoint_url(environment: Environment) -> String {
    let host = match environment {
        Environment::Dev => "wwwdev",
        Environment::Live => "www",
    };
    format!("https://{host}.ebi.ac.uk/{DROP_BOX_PATH}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionParams {
    pub hold_until: Option<HoldDate>,
    pub environment: Environment,
    pub timeout: Duration,
}

impl Default for SubmissionParams {
    fn default() -> Self {
        Self {
            hold_until: None,
            environment: Environment::Dev,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct RegistrationRequest<'a> {
    document: &'a dyn SubmissionDocument,
    params: SubmissionParams,
}

impl<'a> RegistrationRequest<'a> {
    pub fn new(document: &'a dyn SubmissionDocument, params: SubmissionParams) -> Self {
        Self { document, params }
    }

    pub fn document(&self) -> &dyn SubmissionDocument {
        self.document
    }

    pub fn params(&self) -> &SubmissionParams {
        &self.params
    }
}

/// Renders the SUBMISSION envelope. A release call carries no ADD action and
/// only moves the hold date.
pub fn build_envelope(hold_until: Option<HoldDate>, release: bool) -> String {
    let mut actions = String::new();
    if !release {
        actions.push_str("<ACTION><ADD/></ACTION>");
    }
    if let Some(date) = hold_until {
        actions.push_str(&format!(
            "<ACTION><HOLD HoldUntilDate=\"{}\"/></ACTION>",
            escape(&date.to_string())
        ));
    }
    format!("<SUBMISSION><ACTIONS>{actions}</ACTIONS></SUBMISSION>")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPart {
    pub field: &'static str,
    pub xml: String,
}

pub trait RegistrationTransport: Send + Sync {
    /// Posts the parts and returns the raw receipt body.
    fn post(
        &self,
        environment: Environment,
        timeout: Duration,
        parts: &[DocumentPart],
    ) -> Result<String, LoaderError>;
}

#[derive(Clone)]
pub struct WebinHttpClient {
    client: Client,
    credentials: Credentials,
}

impl WebinHttpClient {
    pub fn new(credentials: Credentials) -> Result<Self, LoaderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("webin-loader/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LoaderError::RegistrationHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| LoaderError::RegistrationHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl RegistrationTransport for WebinHttpClient {
    fn post(
        &self,
        environment: Environment,
        timeout: Duration,
        parts: &[DocumentPart],
    ) -> Result<String, LoaderError> {
        let mut form = Form::new();
        for part in parts {
            let file = Part::text(part.xml.clone())
                .file_name(format!("{}.xml", part.field.to_ascii_lowercase()))
                .mime_str("application/xml")
                .map_err(|err| LoaderError::RegistrationHttp(err.to_string()))?;
            form = form.part(part.field, file);
        }

        let url = endpoint_url(environment);
        tracing::debug!(%url, parts = parts.len(), "posting registration");
        let response = self
            .client
            .post(&url)
            .basic_auth(
                self.credentials.username(),
                Some(self.credentials.password()),
            )
            .timeout(timeout)
            .multipart(form)
            .send()
            .map_err(|err| LoaderError::RegistrationHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "registration request failed".to_string());
            return Err(LoaderError::RegistrationStatus { status, message });
        }
        response
            .text()
            .map_err(|err| LoaderError::RegistrationHttp(err.to_string()))
    }
}

/// Registers studies and sample sets, at most once per working directory.
pub struct RegistrationClient<T: RegistrationTransport> {
    transport: T,
    checkpoints: CheckpointStore,
}

impl<T: RegistrationTransport> RegistrationClient<T> {
    pub fn new(transport: T, checkpoints: CheckpointStore) -> Self {
        Self {
            transport,
            checkpoints,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn register(
        &self,
        request: &RegistrationRequest<'_>,
    ) -> Result<RegistrationResult, LoaderError> {
        let document = request.document();
        let kind = document.kind();
        if let Some(saved) = self.checkpoints.load(kind) {
            tracing::info!(
                %kind,
                submission = saved.submission_accession.as_deref().unwrap_or("-"),
                "using checkpointed registration"
            );
            return Ok(saved);
        }

        let params = request.params();
        let workdir = self.checkpoints.workdir();
        let envelope = build_envelope(params.hold_until, false);
        let xml = document.to_document();
        WorkDir::write_bytes_atomic(&workdir.document_path("submission"), envelope.as_bytes())?;
        WorkDir::write_bytes_atomic(&workdir.document_path(kind.as_str()), xml.as_bytes())?;

        tracing::info!(%kind, environment = %params.environment, "registering");
        let parts = [
            DocumentPart {
                field: "SUBMISSION",
                xml: envelope,
            },
            DocumentPart {
                field: kind.field_name(),
                xml,
            },
        ];
        let body = self
            .transport
            .post(params.environment, params.timeout, &parts)?;
        WorkDir::write_bytes_atomic(
            &workdir.document_path(&format!("{}_response", kind.as_str())),
            body.as_bytes(),
        )?;

        let mut result = document.parse_response(&body)?;
        result.recover_existing(kind);
        if result.is_accepted() {
            tracing::info!(
                %kind,
                submission = result.submission_accession.as_deref().unwrap_or("-"),
                objects = result.objects.len(),
                "registration accepted"
            );
        } else {
            tracing::warn!(%kind, errors = ?result.error_messages(), "registration not accepted");
        }

        self.checkpoints.save(kind, &result)?;
        Ok(result)
    }

    /// Sends an envelope without documents, releasing held objects on
    /// `params.hold_until`. Not checkpointed.
    pub fn release(&self, params: &SubmissionParams) -> Result<RegistrationResult, LoaderError> {
        let envelope = build_envelope(params.hold_until, true);
        let parts = [DocumentPart {
            field: "SUBMISSION",
            xml: envelope,
        }];
        tracing::info!(environment = %params.environment, "sending release");
        let body = self
            .transport
            .post(params.environment, params.timeout, &parts)?;
        parse_receipt(&body, None)
    }
}
