//! Command value objects submitted to an oracle.
//!
//! A [`Command`] is a kind-specific body plus an optional opaque payload.
//! Cloning ([`Command::clone_without_payload`]) duplicates the body only;
//! the payload has a single owner and moves out through
//! [`Command::release_payload`].

mod file;
mod http;
mod image;
mod wado;

use std::any::Any;
use std::fmt;

use stone_core::StoneError;

pub use file::{ParseDicomFromFileCommand, ReadFileCommand, SleepCommand};
pub use http::{HttpCommand, HttpHeaders, HttpMethod, OrthancRestApiCommand};
pub use image::{GetOrthancImageCommand, GetOrthancWebViewerJpegCommand, PixelFormat};
pub use wado::{DicomWebSource, ParseDicomFromWadoCommand, WadoRequest};

// ── Kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Http,
    OrthancRestApi,
    GetOrthancImage,
    GetOrthancWebViewerJpeg,
    ReadFile,
    Sleep,
    ParseDicomFromFile,
    ParseDicomFromWado,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Http => "http",
            CommandKind::OrthancRestApi => "orthanc-rest-api",
            CommandKind::GetOrthancImage => "get-orthanc-image",
            CommandKind::GetOrthancWebViewerJpeg => "get-orthanc-web-viewer-jpeg",
            CommandKind::ReadFile => "read-file",
            CommandKind::Sleep => "sleep",
            CommandKind::ParseDicomFromFile => "parse-dicom-from-file",
            CommandKind::ParseDicomFromWado => "parse-dicom-from-wado",
        };
        f.write_str(name)
    }
}

/// Kind-specific parameters of a command.
#[derive(Debug, Clone)]
pub enum CommandBody {
    Http(HttpCommand),
    OrthancRestApi(OrthancRestApiCommand),
    GetOrthancImage(GetOrthancImageCommand),
    GetOrthancWebViewerJpeg(GetOrthancWebViewerJpegCommand),
    ReadFile(ReadFileCommand),
    Sleep(SleepCommand),
    ParseDicomFromFile(ParseDicomFromFileCommand),
    ParseDicomFromWado(ParseDicomFromWadoCommand),
}

impl CommandBody {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandBody::Http(_) => CommandKind::Http,
            CommandBody::OrthancRestApi(_) => CommandKind::OrthancRestApi,
            CommandBody::GetOrthancImage(_) => CommandKind::GetOrthancImage,
            CommandBody::GetOrthancWebViewerJpeg(_) => CommandKind::GetOrthancWebViewerJpeg,
            CommandBody::ReadFile(_) => CommandKind::ReadFile,
            CommandBody::Sleep(_) => CommandKind::Sleep,
            CommandBody::ParseDicomFromFile(_) => CommandKind::ParseDicomFromFile,
            CommandBody::ParseDicomFromWado(_) => CommandKind::ParseDicomFromWado,
        }
    }
}

macro_rules! body_from {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        $(
            impl From<$ty> for CommandBody {
                fn from(body: $ty) -> Self {
                    CommandBody::$variant(body)
                }
            }

            impl From<$ty> for Command {
                fn from(body: $ty) -> Self {
                    Command::new(body)
                }
            }
        )+
    };
}

body_from!(
    Http(HttpCommand),
    OrthancRestApi(OrthancRestApiCommand),
    GetOrthancImage(GetOrthancImageCommand),
    GetOrthancWebViewerJpeg(GetOrthancWebViewerJpegCommand),
    ReadFile(ReadFileCommand),
    Sleep(SleepCommand),
    ParseDicomFromFile(ParseDicomFromFileCommand),
    ParseDicomFromWado(ParseDicomFromWadoCommand),
);

// ── Payload ─────────────────────────────────────────────────────────

/// Opaque user data carried through the asynchronous boundary.
pub struct Payload(Box<dyn Any + Send + Sync>);

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Take the value out, or get the payload back if `T` does not match.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(other) => Err(Self(other)),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(..)")
    }
}

// ── Command ─────────────────────────────────────────────────────────

/// A unit of work for an oracle. Move-only: the payload is never duplicated.
#[derive(Debug)]
pub struct Command {
    body: CommandBody,
    payload: Option<Payload>,
    caller_name: String,
}

impl Command {
    pub fn new(body: impl Into<CommandBody>) -> Self {
        Self {
            body: body.into(),
            payload: None,
            caller_name: String::new(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.body.kind()
    }

    pub fn body(&self) -> &CommandBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut CommandBody {
        &mut self.body
    }

    /// Debug label of the code that issued this command.
    pub fn caller_name(&self) -> &str {
        &self.caller_name
    }

    pub fn set_caller_name(&mut self, name: impl Into<String>) {
        self.caller_name = name.into();
    }

    pub fn with_caller_name(mut self, name: impl Into<String>) -> Self {
        self.set_caller_name(name);
        self
    }

    /// Copy of the body and caller name, without the payload.
    pub fn clone_without_payload(&self) -> Self {
        Self {
            body: self.body.clone(),
            payload: None,
            caller_name: self.caller_name.clone(),
        }
    }

    // ── Payload access ──

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Attach a payload, replacing any previous one.
    pub fn set_payload<T: Any + Send + Sync>(&mut self, value: T) {
        self.payload = Some(Payload::new(value));
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.set_payload(value);
        self
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Move the payload out. Fails with `InvalidState` when there is none.
    pub fn release_payload(&mut self) -> Result<Payload, StoneError> {
        self.payload
            .take()
            .ok_or_else(|| StoneError::InvalidState("the command has no payload to release".into()))
    }

    // ── Typed body accessors ──

    pub fn as_http(&self) -> Option<&HttpCommand> {
        match &self.body {
            CommandBody::Http(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_orthanc_rest_api(&self) -> Option<&OrthancRestApiCommand> {
        match &self.body {
            CommandBody::OrthancRestApi(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_read_file(&self) -> Option<&ReadFileCommand> {
        match &self.body {
            CommandBody::ReadFile(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_sleep(&self) -> Option<&SleepCommand> {
        match &self.body {
            CommandBody::Sleep(c) => Some(c),
            _ => None,
        }
    }
}
