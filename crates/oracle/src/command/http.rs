use std::collections::BTreeMap;
use std::fmt;

/// Header name → value. Names are kept as given.
pub type HttpHeaders = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// Plain HTTP request to an arbitrary URL.
#[derive(Debug, Clone)]
pub struct HttpCommand {
    method: HttpMethod,
    url: String,
    headers: HttpHeaders,
    body: Vec<u8>,
    /// Seconds, 0 = no timeout.
    timeout_secs: u64,
    credentials: Option<(String, String)>,
}

impl HttpCommand {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HttpHeaders::new(),
            body: Vec::new(),
            timeout_secs: 600,
            credentials: None,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HttpHeaders {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }
}

/// Request against the REST API of the configured Orthanc server.
#[derive(Debug, Clone)]
pub struct OrthancRestApiCommand {
    method: HttpMethod,
    uri: String,
    headers: HttpHeaders,
    body: Vec<u8>,
    timeout_secs: u64,
    apply_plugins: bool,
}

impl OrthancRestApiCommand {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            uri: uri.into(),
            headers: HttpHeaders::new(),
            body: Vec::new(),
            timeout_secs: 600,
            apply_plugins: false,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the body and mark it as JSON.
    pub fn with_body_json(mut self, value: &serde_json::Value) -> Self {
        self.body = value.to_string().into_bytes();
        self.headers
            .insert("Content-Type".into(), "application/json".into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Only honoured by in-server runners; the HTTP runner ignores it.
    pub fn with_apply_plugins(mut self, apply: bool) -> Self {
        self.apply_plugins = apply;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HttpHeaders {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn apply_plugins(&self) -> bool {
        self.apply_plugins
    }
}
