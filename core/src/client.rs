//! The client: configuration, request building and dispatch.
//!
//! # Design
//! `Client::build` is a pure function from a `Request` to the `HttpRequest`
//! that would go on the wire; `Response::from_http` is its counterpart on the
//! way back. Between the two sits a `Transport`. `on_request(...).start()`
//! runs that pipeline on the worker pool and reports through a handler;
//! `execute` runs it on the calling thread.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::config::{ClientConfig, PayloadType};
use crate::context::{CallerContext, Handler, Outcome};
use crate::dispatch::{CallHandle, Dispatcher};
use crate::error::{ClientError, ClientResult};
use crate::http::{find_header, HttpRequest};
use crate::request::{Body, Request, RequestParts};
use crate::response::Response;
use crate::transport::{Transport, UreqTransport};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const RAW_CONTENT_TYPE: &str = "application/octet-stream";

/// A configured client. Cheap to clone; clones share the worker pool and the
/// configuration.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<Arc<ClientConfig>>,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
}

impl Client {
    /// A client that talks HTTP through `UreqTransport`.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Self::with_transport(config, Arc::new(UreqTransport::new()))
    }

    /// Shorthand for `ClientConfig::new` followed by `Client::new`.
    pub fn init(base_url: &str, timeout_ms: u64, payload: PayloadType) -> ClientResult<Self> {
        Self::new(ClientConfig::new(base_url, timeout_ms, payload)?)
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        let dispatcher = Dispatcher::new(config.workers())?;
        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                transport,
                dispatcher,
            }),
        })
    }

    /// The configuration new calls will use.
    pub fn config(&self) -> Arc<ClientConfig> {
        let guard = self
            .inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    }

    /// Replace the configuration. Calls that already started keep the
    /// configuration they started with. The worker pool size is fixed when
    /// the client is created.
    pub fn reconfigure(&self, config: ClientConfig) {
        debug!(base_url = config.base_url(), "reconfiguring client");
        let mut guard = self
            .inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
    }

    /// Pair a request with its handler. Nothing is sent until `Call::start`.
    pub fn on_request<C, H>(&self, context: C, request: Request, handler: H) -> Call
    where
        C: CallerContext + 'static,
        H: Handler,
    {
        Call {
            client: self.clone(),
            context: Arc::new(context),
            request,
            handler: Box::new(handler),
        }
    }

    /// Run one request on the calling thread.
    pub fn execute(&self, request: Request) -> ClientResult<Response> {
        let config = self.config();
        round_trip(self.inner.transport.as_ref(), &config, request)
    }

    /// Translate a `Request` into the wire request `config` would send.
    pub fn build(config: &ClientConfig, request: Request) -> ClientResult<HttpRequest> {
        let RequestParts {
            method,
            path,
            mut headers,
            params,
            body,
        } = request.into_parts();
        let mut url = config.resolve(&path);

        let body = match body {
            Some(Body::Multipart(mut multipart)) => {
                multipart.prepend_text_fields(&params);
                let encoded = multipart.encode()?;
                set_default_header(&mut headers, "Content-Type", &encoded.content_type);
                Some(encoded.body)
            }
            Some(Body::Raw(bytes)) => {
                append_query(&mut url, &params)?;
                set_default_header(&mut headers, "Content-Type", RAW_CONTENT_TYPE);
                Some(bytes)
            }
            None if method.allows_body() => {
                let form = urlencode(&params)?;
                set_default_header(&mut headers, "Content-Type", FORM_CONTENT_TYPE);
                Some(form.into_bytes())
            }
            None => {
                append_query(&mut url, &params)?;
                None
            }
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// A request bound to a handler and a caller context, ready to start.
pub struct Call {
    client: Client,
    context: Arc<dyn CallerContext>,
    request: Request,
    handler: Box<dyn Handler>,
}

impl Call {
    /// Dispatch the request. Returns immediately; every outcome after this
    /// point, failures included, reaches the handler.
    pub fn start(self) -> CallHandle {
        let Call {
            client,
            context,
            request,
            handler,
        } = self;
        let config = client.config();
        let transport = client.inner.transport.clone();
        let timeout = config.timeout();
        let work = move || -> Outcome { round_trip(transport.as_ref(), &config, request) };
        client
            .inner
            .dispatcher
            .submit(work, timeout, context, handler)
    }
}

fn round_trip(
    transport: &dyn Transport,
    config: &ClientConfig,
    request: Request,
) -> ClientResult<Response> {
    let wire = Client::build(config, request)?;
    let response = transport.execute(&wire, config.timeout())?;
    Response::from_http(response, config.payload())
}

fn set_default_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if find_header(headers, name).is_none() {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn urlencode(params: &[(String, String)]) -> ClientResult<String> {
    serde_urlencoded::to_string(params)
        .map_err(|e| ClientError::InvalidRequest(format!("cannot encode parameters: {e}")))
}

fn append_query(url: &mut String, params: &[(String, String)]) -> ClientResult<()> {
    if params.is_empty() {
        return Ok(());
    }
    let query = urlencode(params)?;
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&query);
    Ok(())
}
