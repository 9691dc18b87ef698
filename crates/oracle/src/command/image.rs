use stone_core::StoneError;

use super::http::HttpHeaders;

/// Pixel layout a caller expects to decode from an image answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Grayscale8,
    Grayscale16,
    SignedGrayscale16,
}

impl PixelFormat {
    /// Suffix of the Orthanc route serving this format.
    fn uri_suffix(self) -> Result<&'static str, StoneError> {
        match self {
            PixelFormat::Rgb24 => Ok("preview"),
            PixelFormat::Grayscale16 => Ok("image-uint16"),
            PixelFormat::SignedGrayscale16 => Ok("image-int16"),
            PixelFormat::Grayscale8 => Err(StoneError::ParameterOutOfRange(
                "Orthanc has no decoded-image route for 8-bit grayscale".into(),
            )),
        }
    }
}

/// Fetch a decoded frame from Orthanc (PNG, JPEG or PAM answer).
#[derive(Debug, Clone)]
pub struct GetOrthancImageCommand {
    uri: String,
    headers: HttpHeaders,
    timeout_secs: u64,
    expected_format: PixelFormat,
}

impl Default for GetOrthancImageCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl GetOrthancImageCommand {
    pub fn new() -> Self {
        Self {
            uri: String::new(),
            headers: HttpHeaders::new(),
            timeout_secs: 600,
            expected_format: PixelFormat::Grayscale8,
        }
    }

    /// `/instances/{instance}/{preview|image-uint16|image-int16}`.
    pub fn set_instance_uri(&mut self, instance: &str, format: PixelFormat) -> Result<(), StoneError> {
        self.uri = format!("/instances/{instance}/{}", format.uri_suffix()?);
        self.expected_format = format;
        Ok(())
    }

    /// `/instances/{instance}/frames/{frame}/{suffix}`.
    pub fn set_frame_uri(
        &mut self,
        instance: &str,
        frame: u32,
        format: PixelFormat,
    ) -> Result<(), StoneError> {
        self.uri = format!("/instances/{instance}/frames/{frame}/{}", format.uri_suffix()?);
        self.expected_format = format;
        Ok(())
    }

    /// Prefer a specific encoding of the answer, e.g. `image/png`.
    pub fn set_http_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn set_timeout(&mut self, seconds: u64) {
        self.timeout_secs = seconds;
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn expected_format(&self) -> PixelFormat {
        self.expected_format
    }
}

/// Fetch a JPEG-compressed frame through the Orthanc Web viewer plugin.
#[derive(Debug, Clone)]
pub struct GetOrthancWebViewerJpegCommand {
    instance_id: String,
    frame: u32,
    quality: u8,
    headers: HttpHeaders,
    timeout_secs: u64,
    expected_format: PixelFormat,
}

impl GetOrthancWebViewerJpegCommand {
    pub fn new(instance_id: impl Into<String>, frame: u32) -> Self {
        Self {
            instance_id: instance_id.into(),
            frame,
            quality: 95,
            headers: HttpHeaders::new(),
            timeout_secs: 600,
            expected_format: PixelFormat::Grayscale8,
        }
    }

    /// JPEG quality, 1..=100.
    pub fn set_quality(&mut self, quality: u8) -> Result<(), StoneError> {
        if quality == 0 || quality > 100 {
            return Err(StoneError::ParameterOutOfRange(format!(
                "JPEG quality must be within 1..=100, got {quality}"
            )));
        }
        self.quality = quality;
        Ok(())
    }

    pub fn set_expected_format(&mut self, format: PixelFormat) {
        self.expected_format = format;
    }

    pub fn set_http_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn set_timeout(&mut self, seconds: u64) {
        self.timeout_secs = seconds;
    }

    pub fn uri(&self) -> String {
        format!(
            "/web-viewer/instances/jpeg{}-{}_{}",
            self.quality, self.instance_id, self.frame
        )
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn expected_format(&self) -> PixelFormat {
        self.expected_format
    }
}
