//! Execution of a single command.
//!
//! [`GenericOracleRunner`] is shared by both backends: the threaded oracle
//! drives it from per-worker runtimes, the cooperative oracle spawns it on
//! the host runtime. Sleep commands never reach the runner; each backend
//! owns its timers.

mod dicom;
mod http;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stone_core::config::{OracleConfig, OrthancConfig};
use stone_core::StoneError;
use stone_messaging::{Message, MessageEmitter, ReceiverHandle};
use tracing::{debug, warn};

pub use dicom::{CachedDicom, DicomCacheKey, DicomParser, ParsedDicomCache};

use crate::command::{
    Command, CommandBody, GetOrthancImageCommand, HttpCommand, HttpHeaders, HttpMethod,
    OrthancRestApiCommand, ParseDicomFromFileCommand, ParseDicomFromWadoCommand, WadoRequest,
};
use crate::messages::{
    GetOrthancImageSuccess, GetOrthancWebViewerJpegSuccess, HttpSuccess, ImageMime,
    OracleCommandException, OrthancRestApiSuccess, ParseDicomSuccess, ReadFileSuccess,
};
use self::http::{HttpAnswer, Request};

// ── Settings ────────────────────────────────────────────────────────

/// Inputs shared by every runner of an oracle.
#[derive(Clone)]
pub struct RunnerSettings {
    pub root_directory: PathBuf,
    pub orthanc: OrthancConfig,
    pub dicom_parser: Option<Arc<dyn DicomParser>>,
    pub dicom_cache: Option<Arc<Mutex<ParsedDicomCache>>>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("."),
            orthanc: OrthancConfig::default(),
            dicom_parser: None,
            dicom_cache: None,
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &OracleConfig) -> Self {
        let mut settings = Self {
            root_directory: config.root_directory.clone(),
            orthanc: config.orthanc.clone(),
            ..Self::default()
        };
        settings.set_dicom_cache_size(config.dicom_cache_size);
        settings
    }

    /// 0 disables the cache.
    pub fn set_dicom_cache_size(&mut self, bytes: u64) {
        self.dicom_cache = (bytes > 0).then(|| Arc::new(Mutex::new(ParsedDicomCache::new(bytes))));
    }
}

// ── Runner ──────────────────────────────────────────────────────────

pub struct GenericOracleRunner {
    settings: RunnerSettings,
    http_client: reqwest::Client,
    orthanc_client: reqwest::Client,
}

impl GenericOracleRunner {
    pub fn new(settings: RunnerSettings) -> Result<Self, StoneError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoneError::Internal(format!("failed to build HTTP client: {e}")))?;

        let mut orthanc_builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if settings.orthanc.timeout_secs > 0 {
            orthanc_builder = orthanc_builder.timeout(Duration::from_secs(settings.orthanc.timeout_secs));
        }
        let orthanc_client = orthanc_builder
            .build()
            .map_err(|e| StoneError::Internal(format!("failed to build Orthanc client: {e}")))?;

        Ok(Self {
            settings,
            http_client,
            orthanc_client,
        })
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `command` and emit its outcome to `receiver`.
    pub async fn execute(&self, emitter: &dyn MessageEmitter, receiver: &ReceiverHandle, command: Command) {
        let origin = Arc::new(command);
        match self.run(&origin).await {
            Ok(message) => emitter.emit_message(receiver, message.as_ref()),
            Err(e) => {
                warn!(kind = %origin.kind(), caller = origin.caller_name(), error = %e, "command failed");
                let message = OracleCommandException {
                    origin,
                    exception: e.into(),
                };
                emitter.emit_message(receiver, &message);
            }
        }
    }

    /// Run `origin` and build its success message.
    pub async fn run(&self, origin: &Arc<Command>) -> Result<Box<dyn Message>, StoneError> {
        debug!(kind = %origin.kind(), caller = origin.caller_name(), "running command");
        let origin_ref = Arc::clone(origin);
        match origin.body() {
            CommandBody::Http(command) => {
                let answer = self.run_http(command).await?;
                Ok(Box::new(HttpSuccess {
                    origin: origin_ref,
                    status: answer.status,
                    headers: answer.headers,
                    answer: answer.body,
                }))
            }
            CommandBody::OrthancRestApi(command) => {
                let answer = self.run_rest_api(command).await?;
                Ok(Box::new(OrthancRestApiSuccess {
                    origin: origin_ref,
                    headers: answer.headers,
                    answer: answer.body,
                }))
            }
            CommandBody::GetOrthancImage(command) => {
                let (mime, image) = self.run_get_image(command).await?;
                Ok(Box::new(GetOrthancImageSuccess {
                    origin: origin_ref,
                    mime,
                    image,
                }))
            }
            CommandBody::GetOrthancWebViewerJpeg(command) => {
                let uri = command.uri();
                let answer = self
                    .orthanc_get(&uri, command.headers(), command.timeout_secs())
                    .await?;
                let info = http::parse_web_viewer_answer(&answer.body)?;
                Ok(Box::new(GetOrthancWebViewerJpegSuccess {
                    origin: origin_ref,
                    info,
                }))
            }
            CommandBody::ReadFile(command) => {
                let content = self.read_file(command.path()).await?;
                Ok(Box::new(ReadFileSuccess {
                    origin: origin_ref,
                    content: content.into(),
                }))
            }
            CommandBody::ParseDicomFromFile(command) => {
                let cached = self.run_parse_file(command).await?;
                Ok(Box::new(parse_success(origin_ref, cached)))
            }
            CommandBody::ParseDicomFromWado(command) => {
                let cached = self.run_parse_wado(command).await?;
                Ok(Box::new(parse_success(origin_ref, cached)))
            }
            CommandBody::Sleep(_) => Err(StoneError::BadParameterType(
                "sleep commands are handled by the oracle, not the runner".into(),
            )),
        }
    }

    // ── Network ─────────────────────────────────────────────────────

    async fn run_http(&self, command: &HttpCommand) -> Result<HttpAnswer, StoneError> {
        http::send(
            &self.http_client,
            Request {
                method: command.method(),
                url: command.url(),
                headers: command.headers(),
                body: command.body(),
                timeout_secs: command.timeout_secs(),
                credentials: command.credentials(),
            },
        )
        .await
    }

    async fn run_rest_api(&self, command: &OrthancRestApiCommand) -> Result<HttpAnswer, StoneError> {
        let url = http::join_uri(&self.settings.orthanc.url, command.uri());
        http::send(
            &self.orthanc_client,
            Request {
                method: command.method(),
                url: &url,
                headers: command.headers(),
                body: command.body(),
                timeout_secs: command.timeout_secs(),
                credentials: self.orthanc_credentials(),
            },
        )
        .await
    }

    async fn orthanc_get(
        &self,
        uri: &str,
        headers: &HttpHeaders,
        timeout_secs: u64,
    ) -> Result<HttpAnswer, StoneError> {
        let url = http::join_uri(&self.settings.orthanc.url, uri);
        http::send(
            &self.orthanc_client,
            Request {
                method: HttpMethod::Get,
                url: &url,
                headers,
                body: &[],
                timeout_secs,
                credentials: self.orthanc_credentials(),
            },
        )
        .await
    }

    fn orthanc_credentials(&self) -> Option<(&str, &str)> {
        let orthanc = &self.settings.orthanc;
        orthanc
            .has_credentials()
            .then(|| (orthanc.username.as_str(), orthanc.password.as_str()))
    }

    async fn run_get_image(
        &self,
        command: &GetOrthancImageCommand,
    ) -> Result<(ImageMime, bytes::Bytes), StoneError> {
        let answer = self
            .orthanc_get(command.uri(), command.headers(), command.timeout_secs())
            .await?;

        let mime = http::image_mime(&answer.headers)?;
        Ok((mime, answer.body))
    }

    // ── Files ───────────────────────────────────────────────────────

    /// Relative paths resolve against the root directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.root_directory.join(path)
        }
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, StoneError> {
        let path = self.resolve_path(path);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoneError::InexistentFile(path.display().to_string())
            } else {
                StoneError::Io(e)
            }
        })
    }

    // ── DICOM ───────────────────────────────────────────────────────

    fn dicom_parser(&self) -> Result<&Arc<dyn DicomParser>, StoneError> {
        self.settings
            .dicom_parser
            .as_ref()
            .ok_or_else(|| StoneError::NotImplemented("no DICOM parser is installed".into()))
    }

    fn cache_lookup(&self, key: &DicomCacheKey, need_pixel_data: bool) -> Option<CachedDicom> {
        let cache = self.settings.dicom_cache.as_ref()?;
        let hit = cache.lock().acquire(key, need_pixel_data);
        if hit.is_some() {
            debug!(?key, "DICOM cache hit");
        }
        hit
    }

    fn cache_store(&self, key: DicomCacheKey, value: &CachedDicom) {
        if let Some(cache) = &self.settings.dicom_cache {
            cache.lock().insert(key, value.clone());
        }
    }

    async fn run_parse_file(&self, command: &ParseDicomFromFileCommand) -> Result<CachedDicom, StoneError> {
        let path = self.resolve_path(command.path());
        let key = DicomCacheKey::file(&path);
        let need_pixels = command.is_pixel_data_included();
        if let Some(hit) = self.cache_lookup(&key, need_pixels) {
            return Ok(hit);
        }

        let parser = self.dicom_parser()?;
        let content = self.read_file(&path).await?;
        let parsed = CachedDicom {
            dicom: parser.parse_file(&content, need_pixels)?,
            file_size: content.len() as u64,
            has_pixel_data: need_pixels,
        };
        self.cache_store(key, &parsed);
        Ok(parsed)
    }

    async fn run_parse_wado(&self, command: &ParseDicomFromWadoCommand) -> Result<CachedDicom, StoneError> {
        let key = DicomCacheKey::Wado {
            sop_instance_uid: command.sop_instance_uid().to_string(),
            transcode: command.transcode_transfer_syntax().ok().map(str::to_string),
        };
        if let Some(hit) = self.cache_lookup(&key, true) {
            return Ok(hit);
        }

        let parser = self.dicom_parser()?;
        let answer = match command.request() {
            WadoRequest::Http(request) => self.run_http(request).await?,
            WadoRequest::OrthancRestApi(request) => self.run_rest_api(request).await?,
        };
        let parsed = CachedDicom {
            dicom: parser.parse_wado_answer(&answer.body, &answer.headers)?,
            file_size: answer.body.len() as u64,
            has_pixel_data: true,
        };
        self.cache_store(key, &parsed);
        Ok(parsed)
    }
}

fn parse_success(origin: Arc<Command>, cached: CachedDicom) -> ParseDicomSuccess {
    ParseDicomSuccess {
        origin,
        dicom: cached.dicom,
        file_size: cached.file_size,
        has_pixel_data: cached.has_pixel_data,
    }
}
