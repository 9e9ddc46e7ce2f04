//! Caller-facing request builder.
//!
//! A `Request` is owned by the caller until it is handed to `Client::on_request`
//! or `Client::execute`, which take it by value. Header and parameter keys are
//! compared case-sensitively; writing an existing key replaces its value in
//! place, so enumeration order stays the order keys were first added.

use crate::error::{ClientError, ClientResult};
use crate::http::HttpMethod;
use crate::multipart::Multipart;

/// Request body: raw bytes or a multipart form.
#[derive(Debug, Clone)]
pub enum Body {
    Raw(Vec<u8>),
    Multipart(Multipart),
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Raw(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body::Raw(bytes.to_vec())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Raw(s.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Raw(s.as_bytes().to_vec())
    }
}

impl From<Multipart> for Body {
    fn from(mp: Multipart) -> Self {
        Body::Multipart(mp)
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    method: HttpMethod,
    path: String,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    body: Option<Body>,
    multipart: bool,
}

impl Request {
    /// A GET request for `path`, relative to the configured base URL.
    pub fn new(path: &str) -> ClientResult<Self> {
        Self::with_method(HttpMethod::Get, path)
    }

    pub fn with_method(method: HttpMethod, path: &str) -> ClientResult<Self> {
        if path.trim().is_empty() {
            return Err(ClientError::InvalidRequest("path is empty".to_string()));
        }
        Ok(Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
            multipart: false,
        })
    }

    /// Like `with_method`, taking the method by name (`"POST"`).
    pub fn parse(method: &str, path: &str) -> ClientResult<Self> {
        Self::with_method(method.parse()?, path)
    }

    pub fn add_header(&mut self, key: &str, value: &str) -> &mut Self {
        upsert(&mut self.headers, key, value.to_string());
        self
    }

    pub fn add_param(&mut self, key: &str, value: impl ToString) -> &mut Self {
        upsert(&mut self.params, key, value.to_string());
        self
    }

    /// Attach a body. `as_multipart` requires a `Multipart` body; a
    /// `Multipart` body is always sent as `multipart/form-data`.
    ///
    /// GET, DELETE and HEAD take no body: their payload travels as params in
    /// the query string, so a body on them is an `InvalidRequest` here rather
    /// than something the server silently ignores.
    pub fn set_body(&mut self, body: impl Into<Body>, as_multipart: bool) -> ClientResult<&mut Self> {
        let body = body.into();
        if !self.method.allows_body() {
            return Err(ClientError::InvalidRequest(format!(
                "{} requests cannot carry a body",
                self.method
            )));
        }
        let is_multipart = matches!(body, Body::Multipart(_));
        if as_multipart && !is_multipart {
            return Err(ClientError::InvalidRequest(
                "multipart flag set but body is not a Multipart".to_string(),
            ));
        }
        self.body = Some(body);
        self.multipart = is_multipart;
        Ok(self)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        lookup(&self.headers, key)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        lookup(&self.params, key)
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    pub(crate) fn into_parts(self) -> RequestParts {
        RequestParts {
            method: self.method,
            path: self.path,
            headers: self.headers,
            params: self.params,
            body: self.body,
        }
    }
}

pub(crate) struct RequestParts {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<Body>,
}

fn upsert(entries: &mut Vec<(String, String)>, key: &str, value: String) {
    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_string(), value)),
    }
}

fn lookup<'a>(entries: &'a [(String, String)], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
