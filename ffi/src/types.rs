//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Handles (`FfiClient`, `FfiRequest`, `FfiMultipart`, `FfiCall`) are opaque
//! boxes around core values. The only data struct C reads is `FfiOutcome`,
//! which is borrowed for the duration of a callback: `OwnedOutcome` keeps the
//! C strings and body alive while the callback runs and frees them after.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use gridmi_core::{CallHandle, Client, ClientError, Data, Multipart, PayloadType, Request, Response};

/// Opaque handle to a `Client`.
pub struct FfiClient {
    pub(crate) inner: Client,
}

/// Opaque handle to a `Request` under construction.
pub struct FfiRequest {
    pub(crate) inner: Request,
}

/// Opaque handle to a `Multipart` under construction.
pub struct FfiMultipart {
    pub(crate) inner: Multipart,
}

/// Opaque handle to a started call.
pub struct FfiCall {
    pub(crate) inner: CallHandle,
}

/// Payload type as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiPayloadType {
    JsonObject = 0,
    Json = 1,
    Text = 2,
    Bytes = 3,
}

impl From<FfiPayloadType> for PayloadType {
    fn from(p: FfiPayloadType) -> Self {
        match p {
            FfiPayloadType::JsonObject => PayloadType::JsonObject,
            FfiPayloadType::Json => PayloadType::Json,
            FfiPayloadType::Text => PayloadType::Text,
            FfiPayloadType::Bytes => PayloadType::Bytes,
        }
    }
}

/// Error codes returned by builder functions and carried in `FfiOutcome`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidConfig = 1,
    InvalidRequest = 2,
    Encoding = 3,
    Network = 4,
    Timeout = 5,
    Status = 6,
    Decode = 7,
    Startup = 8,
    Panic = 9,
    NullArg = 10,
}

impl From<&ClientError> for FfiErrorCode {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::InvalidConfig(_) => FfiErrorCode::InvalidConfig,
            ClientError::InvalidRequest(_) => FfiErrorCode::InvalidRequest,
            ClientError::Encoding { .. } => FfiErrorCode::Encoding,
            ClientError::Network(_) => FfiErrorCode::Network,
            ClientError::Timeout(_) => FfiErrorCode::Timeout,
            ClientError::Status { .. } => FfiErrorCode::Status,
            ClientError::Decode { .. } => FfiErrorCode::Decode,
            ClientError::Startup(_) => FfiErrorCode::Startup,
        }
    }
}

/// Result of a call as seen by the C callback.
///
/// On success `error_code` is `Ok` and `error_message` is null. `body` and
/// `body_len` hold the raw response bytes whenever a response arrived (also
/// for `Status` and `Decode` failures). `data` is the decoded payload
/// rendered as text (JSON or UTF-8), null for `Bytes` payloads and failures.
/// Every pointer is valid only until the callback returns.
#[repr(C)]
pub struct FfiOutcome {
    pub error_code: FfiErrorCode,
    pub error_message: *const c_char,
    pub http_status: u16,
    pub body: *const u8,
    pub body_len: usize,
    pub data: *const c_char,
}

/// Callback invoked exactly once per started call, on a worker thread.
pub type FfiCallback = extern "C" fn(user_data: *mut c_void, outcome: *const FfiOutcome);

/// Caller-supplied context pointer, carried to the worker thread untouched.
pub(crate) struct UserData(pub(crate) *mut c_void);

// The C caller promises `user_data` may be used from the worker thread.
unsafe impl Send for UserData {}

/// Owns everything an `FfiOutcome` points at.
pub(crate) struct OwnedOutcome {
    error_code: FfiErrorCode,
    error_message: Option<CString>,
    http_status: u16,
    body: Vec<u8>,
    data: Option<CString>,
}

impl OwnedOutcome {
    pub(crate) fn from_outcome(outcome: Result<Response, ClientError>) -> Self {
        match outcome {
            Ok(response) => {
                let data = match response.data() {
                    Data::Json(value) => Some(value.to_string()),
                    Data::Text(text) => Some(text.clone()),
                    Data::Bytes(_) => None,
                };
                Self {
                    error_code: FfiErrorCode::Ok,
                    error_message: None,
                    http_status: response.status(),
                    body: response.raw().to_vec(),
                    data: data.map(c_string),
                }
            }
            Err(err) => Self {
                error_code: FfiErrorCode::from(&err),
                error_message: Some(c_string(err.to_string())),
                http_status: err.status().unwrap_or(0),
                body: err.raw_body().map(<[u8]>::to_vec).unwrap_or_default(),
                data: None,
            },
        }
    }

    pub(crate) fn as_ffi(&self) -> FfiOutcome {
        FfiOutcome {
            error_code: self.error_code,
            error_message: self
                .error_message
                .as_ref()
                .map_or(std::ptr::null(), |s| s.as_ptr()),
            http_status: self.http_status,
            body: if self.body.is_empty() {
                std::ptr::null()
            } else {
                self.body.as_ptr()
            },
            body_len: self.body.len(),
            data: self.data.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
        }
    }
}

/// Build a C string, dropping interior NULs rather than failing.
pub(crate) fn c_string(s: String) -> CString {
    CString::new(s).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}
