//! Blocking HTTP execution.
//!
//! A `Transport` performs exactly one round trip for an `HttpRequest`. It is
//! called from a worker thread, never from the caller's context, and must
//! give up once `timeout` has elapsed. There is no retry at this layer.

use std::time::Duration;

use tracing::trace;

use crate::error::{ClientError, ClientResult};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> ClientResult<HttpResponse>;
}

/// Default transport backed by a shared `ureq` agent.
///
/// Non-2xx statuses are returned as data; status interpretation happens in
/// `Response::from_http`.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> ClientResult<HttpResponse> {
        trace!(method = %request.method, url = %request.url, "executing request");
        let url = request.url.as_str();
        let body = request.body.as_deref();

        let result = match request.method {
            HttpMethod::Get => call(with_headers(self.agent.get(url), request), timeout),
            HttpMethod::Delete => call(with_headers(self.agent.delete(url), request), timeout),
            HttpMethod::Head => call(with_headers(self.agent.head(url), request), timeout),
            HttpMethod::Post => send(with_headers(self.agent.post(url), request), body, timeout),
            HttpMethod::Put => send(with_headers(self.agent.put(url), request), body, timeout),
            HttpMethod::Patch => send(with_headers(self.agent.patch(url), request), body, timeout),
        };

        let mut response = result.map_err(|e| map_ureq_error(e, timeout))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| map_ureq_error(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
) -> ureq::RequestBuilder<B> {
    for (key, value) in &request.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

type UreqResult = Result<ureq::http::Response<ureq::Body>, ureq::Error>;

fn call(builder: ureq::RequestBuilder<ureq::typestate::WithoutBody>, timeout: Duration) -> UreqResult {
    builder.config().timeout_global(Some(timeout)).build().call()
}

fn send(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    body: Option<&[u8]>,
    timeout: Duration,
) -> UreqResult {
    let builder = builder.config().timeout_global(Some(timeout)).build();
    match body {
        Some(bytes) => builder.send(bytes),
        None => builder.send_empty(),
    }
}

fn map_ureq_error(err: ureq::Error, timeout: Duration) -> ClientError {
    match err {
        ureq::Error::Timeout(_) => ClientError::Timeout(timeout),
        other => ClientError::network(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_refused_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://127.0.0.1:{port}/nothing"),
            headers: Vec::new(),
            body: None,
        };
        let err = UreqTransport::new()
            .execute(&request, Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)), "{err:?}");
    }
}
