//! Messages emitted by oracles when a command completes.
//!
//! Every message keeps a reference to the command it answers (its origin),
//! so receivers can read the command's fields and payload.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use stone_core::{OracleException, StoneError};
use stone_messaging::impl_message;

use crate::command::{Command, HttpHeaders};

/// Result of a command parsed by a [`crate::runner::DicomParser`].
pub type ParsedDicom = Arc<dyn Any + Send + Sync>;

/// Message answering a specific command.
pub trait OracleMessage: stone_messaging::Message + Clone {
    fn origin(&self) -> &Command;

    /// Same message, answering `origin` instead.
    fn with_origin(&self, origin: Arc<Command>) -> Self;
}

macro_rules! oracle_message {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl_message!($ty);

            impl OracleMessage for $ty {
                fn origin(&self) -> &Command {
                    &self.origin
                }

                fn with_origin(&self, origin: Arc<Command>) -> Self {
                    Self {
                        origin,
                        ..self.clone()
                    }
                }
            }
        )+
    };
}

// ── Success messages ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpSuccess {
    pub origin: Arc<Command>,
    pub status: u16,
    pub headers: HttpHeaders,
    pub answer: Bytes,
}

#[derive(Debug, Clone)]
pub struct OrthancRestApiSuccess {
    pub origin: Arc<Command>,
    pub headers: HttpHeaders,
    pub answer: Bytes,
}

impl OrthancRestApiSuccess {
    /// Parse the answer as JSON. Malformed JSON is `BadFileFormat`.
    pub fn parse_json(&self) -> Result<serde_json::Value, StoneError> {
        serde_json::from_slice(&self.answer)
            .map_err(|e| StoneError::BadFileFormat(format!("invalid JSON answer: {e}")))
    }
}

/// Encoding of an image answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
    Pam,
}

impl ImageMime {
    /// Recognise a `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(ImageMime::Png),
            "image/jpeg" => Some(ImageMime::Jpeg),
            "image/x-portable-arbitrarymap" => Some(ImageMime::Pam),
            _ => None,
        }
    }
}

/// Encoded frame fetched from Orthanc. Decoding is left to the receiver.
#[derive(Debug, Clone)]
pub struct GetOrthancImageSuccess {
    pub origin: Arc<Command>,
    pub mime: ImageMime,
    pub image: Bytes,
}

/// Metadata and base64 JPEG of a Web viewer frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebViewerJpegInfo {
    /// Base64 encoded JPEG.
    pub pixel_data: String,
    pub stretched: bool,
    pub compression: String,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default)]
    pub stretch_low: Option<i32>,
    #[serde(default)]
    pub stretch_high: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct GetOrthancWebViewerJpegSuccess {
    pub origin: Arc<Command>,
    pub info: WebViewerJpegInfo,
}

#[derive(Debug, Clone)]
pub struct ReadFileSuccess {
    pub origin: Arc<Command>,
    pub content: Bytes,
}

/// A sleep command's delay has elapsed.
#[derive(Debug, Clone)]
pub struct SleepTimeout {
    pub origin: Arc<Command>,
}

#[derive(Debug, Clone)]
pub struct ParseDicomSuccess {
    pub origin: Arc<Command>,
    pub dicom: ParsedDicom,
    pub file_size: u64,
    pub has_pixel_data: bool,
}

impl ParseDicomSuccess {
    pub fn dicom_as<T: Any>(&self) -> Option<&T> {
        self.dicom.downcast_ref::<T>()
    }
}

// ── Failure ─────────────────────────────────────────────────────────

/// A command failed. Carries the error classification.
#[derive(Debug, Clone)]
pub struct OracleCommandException {
    pub origin: Arc<Command>,
    pub exception: OracleException,
}

oracle_message!(
    HttpSuccess,
    OrthancRestApiSuccess,
    GetOrthancImageSuccess,
    GetOrthancWebViewerJpegSuccess,
    ReadFileSuccess,
    SleepTimeout,
    ParseDicomSuccess,
    OracleCommandException,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SleepCommand;

    #[test]
    fn with_origin_rebinds_only_the_command() {
        let first = Arc::new(Command::new(SleepCommand::new(1)).with_caller_name("first"));
        let second = Arc::new(Command::new(SleepCommand::new(2)).with_caller_name("second"));
        let message = ReadFileSuccess {
            origin: first,
            content: Bytes::from_static(b"abc"),
        };

        let rebound = message.with_origin(second);
        assert_eq!(rebound.origin().caller_name(), "second");
        assert_eq!(rebound.content, Bytes::from_static(b"abc"));
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(ImageMime::from_content_type("image/PNG; charset=binary"), Some(ImageMime::Png));
        assert_eq!(ImageMime::from_content_type("application/dicom"), None);
    }
}
