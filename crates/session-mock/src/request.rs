//! Plain-data views of requests and responses.

use std::collections::HashMap;

/// An outgoing request as seen by the mocking layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Short form used in logs and panic messages
    pub fn debug_description(&self) -> String {
        format!("<Request {} {}>", self.method, self.url)
    }
}

/// Response metadata delivered before (or alongside) the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn new(url: impl Into<String>, status_code: u16, headers: HashMap<String, String>) -> Self {
        Self {
            url: url.into(),
            status_code,
            headers,
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
