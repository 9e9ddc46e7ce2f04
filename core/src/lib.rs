//! Callback-based HTTP client core.
//!
//! # Overview
//! Callers configure a `Client` once, build `Request` values, and hand each
//! one to `Client::on_request` together with a `Handler` and a
//! `CallerContext`. `Call::start` runs the round trip on a bounded worker
//! pool; the handler later runs on the caller's context exactly once, with
//! either a decoded `Response` or a `ClientError`.
//!
//! # Design
//! - `Client::build` (request → wire) and `Response::from_http` (wire →
//!   response) are pure; only `Transport` does I/O.
//! - Construction errors are returned synchronously. Everything after
//!   `start()` goes through the handler.
//! - Multipart bodies stream their binary parts from `ContentSource` handles
//!   at encode time.
//! - One attempt per call, no retries.

pub mod client;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod multipart;
pub mod request;
pub mod response;
pub mod transport;

pub use client::{Call, Client};
pub use config::{ClientConfig, PayloadType};
pub use context::{CallerContext, Callbacks, EventLoop, Handler, Inline, LoopHandle, Outcome};
pub use dispatch::CallHandle;
pub use error::{ClientError, ClientResult};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use multipart::{BytesSource, ContentSource, EncodedMultipart, FileSource, Multipart, PartContent};
pub use request::{Body, Request};
pub use response::{Data, Response};
pub use transport::{Transport, UreqTransport};
