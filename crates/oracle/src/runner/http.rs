use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use stone_core::StoneError;
use tracing::debug;

use crate::command::{HttpHeaders, HttpMethod};
use crate::messages::{ImageMime, WebViewerJpegInfo};

/// Raw answer of a successful (2xx) request.
#[derive(Debug)]
pub(crate) struct HttpAnswer {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Bytes,
}

/// Everything needed to send one request.
pub(crate) struct Request<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub headers: &'a HttpHeaders,
    pub body: &'a [u8],
    pub timeout_secs: u64,
    pub credentials: Option<(&'a str, &'a str)>,
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn network_error(url: &str, err: reqwest::Error) -> StoneError {
    if err.is_timeout() {
        StoneError::Timeout(format!("{url}: {err}"))
    } else {
        StoneError::NetworkProtocol(format!("{url}: {err}"))
    }
}

pub(crate) async fn send(client: &reqwest::Client, request: Request<'_>) -> Result<HttpAnswer, StoneError> {
    let mut builder = client.request(to_reqwest_method(request.method), request.url);
    for (name, value) in request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if request.method.has_body() {
        builder = builder.body(request.body.to_vec());
    }
    if request.timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(request.timeout_secs));
    }
    if let Some((username, password)) = request.credentials {
        builder = builder.basic_auth(username, Some(password));
    }

    let response = builder
        .send()
        .await
        .map_err(|e| network_error(request.url, e))?;

    let status = response.status();
    check_status(status.as_u16(), request.url)?;

    let headers: HttpHeaders = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let body = response
        .bytes()
        .await
        .map_err(|e| network_error(request.url, e))?;

    debug!(method = %request.method, url = request.url, status = status.as_u16(), bytes = body.len(), "http answer");

    Ok(HttpAnswer {
        status: status.as_u16(),
        headers,
        body,
    })
}

/// Any status outside 2xx is an error carrying that status.
pub(crate) fn check_status(status: u16, url: &str) -> Result<(), StoneError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StoneError::Http {
            status,
            url: url.to_string(),
        })
    }
}

/// Classify the headers of an Orthanc image answer.
pub(crate) fn image_mime(headers: &HttpHeaders) -> Result<ImageMime, StoneError> {
    if header(headers, "content-disposition") == Some("filename=\"unsupported.png\"") {
        return Err(StoneError::IncompatibleImageFormat(
            "Orthanc cannot decode this image".into(),
        ));
    }

    let content_type = header(headers, "content-type").unwrap_or_default();
    ImageMime::from_content_type(content_type).ok_or_else(|| {
        StoneError::NotImplemented(format!("unsupported HTTP Content-Type for an image: '{content_type}'"))
    })
}

/// Case-insensitive header lookup.
pub(crate) fn header<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Join the Orthanc base URL and a REST URI.
pub(crate) fn join_uri(base: &str, uri: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), uri.trim_start_matches('/'))
}

#[derive(Deserialize)]
struct WebViewerEnvelope {
    #[serde(rename = "Orthanc")]
    orthanc: WebViewerJpegInfo,
}

/// Validate the JSON envelope returned by the Web viewer plugin.
pub(crate) fn parse_web_viewer_answer(answer: &[u8]) -> Result<WebViewerJpegInfo, StoneError> {
    let envelope: WebViewerEnvelope = serde_json::from_slice(answer)
        .map_err(|e| StoneError::BadFileFormat(format!("invalid Web viewer answer: {e}")))?;
    let info = envelope.orthanc;

    if info.compression != "Jpeg" {
        return Err(StoneError::BadFileFormat(format!(
            "unsupported Web viewer compression '{}'",
            info.compression
        )));
    }
    if info.stretched && (info.stretch_low.is_none() || info.stretch_high.is_none()) {
        return Err(StoneError::BadFileFormat(
            "stretched Web viewer frame without StretchLow/StretchHigh".into(),
        ));
    }
    Ok(info)
}
