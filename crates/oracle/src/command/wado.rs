use stone_core::StoneError;

use super::http::{HttpCommand, OrthancRestApiCommand};
use super::{CommandBody, CommandKind};

/// Where DICOMweb requests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DicomWebSource {
    /// DICOMweb plugin of the configured Orthanc server, e.g. root `/dicom-web`.
    Orthanc { root: String },
    /// Any DICOMweb server reachable by plain HTTP.
    Server { base_url: String },
}

/// The request whose answer carries the DICOM instance.
#[derive(Debug, Clone)]
pub enum WadoRequest {
    Http(HttpCommand),
    OrthancRestApi(OrthancRestApiCommand),
}

impl WadoRequest {
    pub fn kind(&self) -> CommandKind {
        match self {
            WadoRequest::Http(_) => CommandKind::Http,
            WadoRequest::OrthancRestApi(_) => CommandKind::OrthancRestApi,
        }
    }
}

/// WADO-RS retrieval of one instance followed by DICOM parsing.
#[derive(Debug, Clone)]
pub struct ParseDicomFromWadoCommand {
    source: DicomWebSource,
    sop_instance_uid: String,
    /// Transfer syntax UID to transcode to, if any.
    transcode: Option<String>,
    request: WadoRequest,
}

impl ParseDicomFromWadoCommand {
    /// Wrap an existing HTTP or REST API request. Other kinds are `BadParameterType`.
    pub fn new(
        source: DicomWebSource,
        sop_instance_uid: impl Into<String>,
        transcode: Option<String>,
        request: CommandBody,
    ) -> Result<Self, StoneError> {
        let request = match request {
            CommandBody::Http(c) => WadoRequest::Http(c),
            CommandBody::OrthancRestApi(c) => WadoRequest::OrthancRestApi(c),
            other => {
                return Err(StoneError::BadParameterType(format!(
                    "WADO retrieval needs an HTTP or REST API request, got {}",
                    other.kind()
                )))
            }
        };
        Ok(Self {
            source,
            sop_instance_uid: sop_instance_uid.into(),
            transcode,
            request,
        })
    }

    /// Build the `/studies/{study}/series/{series}/instances/{sop}` request for `source`.
    pub fn create(
        source: DicomWebSource,
        study_instance_uid: &str,
        series_instance_uid: &str,
        sop_instance_uid: &str,
        transcode: Option<&str>,
    ) -> Result<Self, StoneError> {
        let path = format!(
            "/studies/{study_instance_uid}/series/{series_instance_uid}/instances/{sop_instance_uid}"
        );
        let accept = format!(
            "multipart/related; type=\"application/dicom\"; transfer-syntax={}",
            transcode.unwrap_or("*")
        );
        let request = match &source {
            DicomWebSource::Orthanc { root } => CommandBody::OrthancRestApi(
                OrthancRestApiCommand::new(format!("{}{path}", root.trim_end_matches('/')))
                    .with_header("Accept", accept),
            ),
            DicomWebSource::Server { base_url } => CommandBody::Http(
                HttpCommand::new(format!("{}{path}", base_url.trim_end_matches('/')))
                    .with_header("Accept", accept),
            ),
        };
        Self::new(
            source,
            sop_instance_uid,
            transcode.map(str::to_string),
            request,
        )
    }

    pub fn source(&self) -> &DicomWebSource {
        &self.source
    }

    pub fn sop_instance_uid(&self) -> &str {
        &self.sop_instance_uid
    }

    pub fn is_transcode(&self) -> bool {
        self.transcode.is_some()
    }

    /// Target transfer syntax. `BadSequenceOfCalls` when not transcoding.
    pub fn transcode_transfer_syntax(&self) -> Result<&str, StoneError> {
        self.transcode.as_deref().ok_or_else(|| {
            StoneError::BadSequenceOfCalls("this WADO command does not transcode".into())
        })
    }

    pub fn request(&self) -> &WadoRequest {
        &self.request
    }

    /// Same source, instance and transcoding target.
    pub fn is_same_command(&self, other: &Self) -> bool {
        self.source == other.source
            && self.sop_instance_uid == other.sop_instance_uid
            && self.transcode == other.transcode
    }
}
