//! C-ABI wrapper around `gridmi-core`.
//!
//! # Overview
//! Lets a host with a C FFI (the JNI layer of an Android app, for instance)
//! configure a client, build requests and multipart bodies, and start calls
//! whose outcome comes back through a C callback.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Builder functions return `FfiErrorCode`; constructors return null on
//!   failure.
//! - `gridmi_start` consumes the request. The callback fires exactly once, on
//!   a worker thread, with an `FfiOutcome` that is only valid during the call;
//!   marshalling back to a UI thread is the host's job.
//! - The C caller owns every returned handle and must release it with the
//!   matching `gridmi_*_free` function.

pub mod types;

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use gridmi_core::{Client, Inline, Multipart, Outcome, Request};
use tracing::debug;

use types::*;

/// Borrow a C string argument. `None` for null or non-UTF-8 input.
fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client for `base_url` with a per-request timeout in milliseconds.
///
/// Returns null if `base_url` is null, the configuration is invalid, or the
/// worker pool cannot start. Free with `gridmi_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_client_new(
    base_url: *const c_char,
    timeout_ms: u64,
    payload: FfiPayloadType,
) -> *mut FfiClient {
    catch_unwind(|| {
        let Some(url) = str_arg(base_url) else {
            return std::ptr::null_mut();
        };
        match Client::init(url, timeout_ms, payload.into()) {
            Ok(client) => Box::into_raw(Box::new(FfiClient { inner: client })),
            Err(e) => {
                debug!(error = %e, "gridmi_client_new failed");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client. Calls that have not delivered yet get their callback with
/// `Network` ("client is shutting down") instead of a response, so every
/// `user_data` comes back exactly once. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Create a request. `method` may be null for GET.
///
/// Returns null if `path` is null or empty, or `method` is not recognized.
/// Free with `gridmi_request_free` unless passed to `gridmi_start`.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_request_new(method: *const c_char, path: *const c_char) -> *mut FfiRequest {
    catch_unwind(|| {
        let Some(path) = str_arg(path) else {
            return std::ptr::null_mut();
        };
        let request = if method.is_null() {
            Request::new(path)
        } else {
            match str_arg(method) {
                Some(m) => Request::parse(m, path),
                None => return std::ptr::null_mut(),
            }
        };
        match request {
            Ok(inner) => Box::into_raw(Box::new(FfiRequest { inner })),
            Err(_) => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Set a header, replacing any previous value for the same key.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_request_add_header(
    request: *mut FfiRequest,
    key: *const c_char,
    value: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if request.is_null() {
            return FfiErrorCode::NullArg;
        }
        let (Some(key), Some(value)) = (str_arg(key), str_arg(value)) else {
            return FfiErrorCode::NullArg;
        };
        let request = unsafe { &mut *request };
        request.inner.add_header(key, value);
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Set a query/form parameter, replacing any previous value for the same key.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_request_add_param(
    request: *mut FfiRequest,
    key: *const c_char,
    value: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if request.is_null() {
            return FfiErrorCode::NullArg;
        }
        let (Some(key), Some(value)) = (str_arg(key), str_arg(value)) else {
            return FfiErrorCode::NullArg;
        };
        let request = unsafe { &mut *request };
        request.inner.add_param(key, value);
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Attach a raw body of `len` bytes. `data` may be null only when `len` is 0.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_request_set_body(
    request: *mut FfiRequest,
    data: *const u8,
    len: usize,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if request.is_null() || (data.is_null() && len > 0) {
            return FfiErrorCode::NullArg;
        }
        let bytes = if len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
        };
        let request = unsafe { &mut *request };
        match request.inner.set_body(bytes, false) {
            Ok(_) => FfiErrorCode::Ok,
            Err(e) => FfiErrorCode::from(&e),
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Attach a multipart body. The multipart handle is consumed whenever it is
/// non-null, whether or not this succeeds.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_request_set_multipart(
    request: *mut FfiRequest,
    multipart: *mut FfiMultipart,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if multipart.is_null() {
            return FfiErrorCode::NullArg;
        }
        let multipart = unsafe { Box::from_raw(multipart) };
        if request.is_null() {
            return FfiErrorCode::NullArg;
        }
        let request = unsafe { &mut *request };
        match request.inner.set_body(multipart.inner, true) {
            Ok(_) => FfiErrorCode::Ok,
            Err(e) => FfiErrorCode::from(&e),
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Free a request that was never started. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_request_free(request: *mut FfiRequest) {
    if !request.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(request) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

/// Create an empty multipart body.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_multipart_new() -> *mut FfiMultipart {
    catch_unwind(|| {
        Box::into_raw(Box::new(FfiMultipart {
            inner: Multipart::new(),
        }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Append a text field.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_multipart_append_text(
    multipart: *mut FfiMultipart,
    name: *const c_char,
    value: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if multipart.is_null() {
            return FfiErrorCode::NullArg;
        }
        let (Some(name), Some(value)) = (str_arg(name), str_arg(value)) else {
            return FfiErrorCode::NullArg;
        };
        let multipart = unsafe { &mut *multipart };
        match multipart.inner.append_text(name, value) {
            Ok(_) => FfiErrorCode::Ok,
            Err(e) => FfiErrorCode::from(&e),
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Append a file field. The file is read when the call runs, not now.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_multipart_append_file(
    multipart: *mut FfiMultipart,
    name: *const c_char,
    path: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if multipart.is_null() {
            return FfiErrorCode::NullArg;
        }
        let (Some(name), Some(path)) = (str_arg(name), str_arg(path)) else {
            return FfiErrorCode::NullArg;
        };
        let multipart = unsafe { &mut *multipart };
        match multipart.inner.append_file(name, path) {
            Ok(_) => FfiErrorCode::Ok,
            Err(e) => FfiErrorCode::from(&e),
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Free a multipart body that was never attached. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_multipart_free(multipart: *mut FfiMultipart) {
    if !multipart.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(multipart) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Start `request` (consumed whenever non-null). `callback` runs exactly once
/// on a worker thread with `user_data` and the outcome.
///
/// Returns null if `client` or `request` is null. Free the returned handle
/// with `gridmi_call_free`; freeing it does not cancel the call.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_start(
    client: *const FfiClient,
    request: *mut FfiRequest,
    callback: FfiCallback,
    user_data: *mut c_void,
) -> *mut FfiCall {
    catch_unwind(AssertUnwindSafe(|| {
        if request.is_null() {
            return std::ptr::null_mut();
        }
        let request = unsafe { Box::from_raw(request) };
        if client.is_null() {
            return std::ptr::null_mut();
        }
        let client = unsafe { &*client };
        let user_data = UserData(user_data);

        let handle = client
            .inner
            .on_request(Inline, request.inner, move |outcome: Outcome| {
                let user_data = user_data;
                let owned = OwnedOutcome::from_outcome(outcome);
                let ffi = owned.as_ffi();
                callback(user_data.0, &ffi);
            })
            .start();
        Box::into_raw(Box::new(FfiCall { inner: handle }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Cancel a call. Returns true if the callback is now guaranteed not to run.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_call_cancel(call: *const FfiCall) -> bool {
    if call.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*call }.inner.cancel())).unwrap_or(false)
}

/// Whether the callback has run or the call was cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_call_is_finished(call: *const FfiCall) -> bool {
    if call.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*call }.inner.is_finished())).unwrap_or(false)
}

/// Free a call handle. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn gridmi_call_free(call: *mut FfiCall) {
    if !call.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(call) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::mpsc;
    use std::time::Duration;

    /// What the test callback copies out of an `FfiOutcome`.
    #[derive(Debug)]
    struct Recorded {
        code: FfiErrorCode,
        status: u16,
        body: Vec<u8>,
        data: Option<String>,
        message: Option<String>,
    }

    extern "C" fn record(user_data: *mut c_void, outcome: *const FfiOutcome) {
        let tx = unsafe { &*(user_data as *const mpsc::Sender<Recorded>) };
        let outcome = unsafe { &*outcome };
        let body = if outcome.body.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(outcome.body, outcome.body_len) }.to_vec()
        };
        let text = |p: *const c_char| {
            (!p.is_null()).then(|| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        };
        let _ = tx.send(Recorded {
            code: outcome.error_code,
            status: outcome.http_status,
            body,
            data: text(outcome.data),
            message: text(outcome.error_message),
        });
    }

    fn start_server() -> std::net::SocketAddr {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });
        addr
    }

    fn new_client(base: &str, timeout_ms: u64) -> *mut FfiClient {
        let url = CString::new(base).unwrap();
        gridmi_client_new(url.as_ptr(), timeout_ms, FfiPayloadType::JsonObject)
    }

    #[test]
    fn client_new_and_free() {
        let client = new_client("http://localhost:3000/API/", 1000);
        assert!(!client.is_null());
        gridmi_client_free(client);
    }

    #[test]
    fn client_new_rejects_bad_config() {
        assert!(gridmi_client_new(std::ptr::null(), 1000, FfiPayloadType::Json).is_null());
        assert!(new_client("localhost:3000", 1000).is_null());
        assert!(new_client("http://localhost:3000", 0).is_null());
    }

    #[test]
    fn free_null_is_safe() {
        gridmi_client_free(std::ptr::null_mut());
        gridmi_request_free(std::ptr::null_mut());
        gridmi_multipart_free(std::ptr::null_mut());
        gridmi_call_free(std::ptr::null_mut());
    }

    #[test]
    fn request_new_defaults_to_get() {
        let path = CString::new("profile/get").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());
        assert!(!req.is_null());
        assert_eq!(unsafe { &*req }.inner.method(), gridmi_core::HttpMethod::Get);
        gridmi_request_free(req);
    }

    #[test]
    fn request_new_rejects_bad_input() {
        let empty = CString::new("").unwrap();
        assert!(gridmi_request_new(std::ptr::null(), empty.as_ptr()).is_null());
        let path = CString::new("photo/add").unwrap();
        let method = CString::new("BREW").unwrap();
        assert!(gridmi_request_new(method.as_ptr(), path.as_ptr()).is_null());
        assert!(gridmi_request_new(std::ptr::null(), std::ptr::null()).is_null());
    }

    #[test]
    fn headers_and_params_overwrite() {
        let path = CString::new("profile/get").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());
        let key = CString::new("X-Key").unwrap();
        let a = CString::new("a").unwrap();
        let b = CString::new("b").unwrap();
        assert_eq!(gridmi_request_add_header(req, key.as_ptr(), a.as_ptr()), FfiErrorCode::Ok);
        assert_eq!(gridmi_request_add_header(req, key.as_ptr(), b.as_ptr()), FfiErrorCode::Ok);
        assert_eq!(gridmi_request_add_param(req, key.as_ptr(), a.as_ptr()), FfiErrorCode::Ok);
        assert_eq!(
            gridmi_request_add_param(req, std::ptr::null(), a.as_ptr()),
            FfiErrorCode::NullArg
        );

        let inner = &unsafe { &*req }.inner;
        assert_eq!(inner.headers().len(), 1);
        assert_eq!(inner.header("X-Key"), Some("b"));
        assert_eq!(inner.param("X-Key"), Some("a"));
        gridmi_request_free(req);
    }

    #[test]
    fn body_on_get_is_invalid_request() {
        let path = CString::new("profile/get").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());
        let body = b"x";
        assert_eq!(
            gridmi_request_set_body(req, body.as_ptr(), body.len()),
            FfiErrorCode::InvalidRequest
        );
        gridmi_request_free(req);
    }

    #[test]
    fn multipart_empty_name_is_invalid_request() {
        let mp = gridmi_multipart_new();
        let empty = CString::new("").unwrap();
        let value = CString::new("v").unwrap();
        assert_eq!(
            gridmi_multipart_append_text(mp, empty.as_ptr(), value.as_ptr()),
            FfiErrorCode::InvalidRequest
        );
        gridmi_multipart_free(mp);
    }

    #[test]
    fn start_null_args_returns_null() {
        let path = CString::new("profile/get").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());
        // The request is consumed even though the client is missing.
        let call = gridmi_start(std::ptr::null(), req, record, std::ptr::null_mut());
        assert!(call.is_null());
        assert!(!gridmi_call_cancel(std::ptr::null()));
    }

    #[test]
    fn profile_call_end_to_end() {
        let addr = start_server();
        let client = new_client(&format!("http://{addr}/API/"), 5000);

        let path = CString::new("profile/get").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());
        let key = CString::new("X-Key").unwrap();
        let value = CString::new(mock_server::API_KEY).unwrap();
        let id = CString::new("id").unwrap();
        let ten = CString::new("10").unwrap();
        gridmi_request_add_header(req, key.as_ptr(), value.as_ptr());
        gridmi_request_add_param(req, id.as_ptr(), ten.as_ptr());

        let (tx, rx) = mpsc::channel::<Recorded>();
        let call = gridmi_start(client, req, record, &tx as *const _ as *mut c_void);
        assert!(!call.is_null());

        let recorded = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(recorded.code, FfiErrorCode::Ok);
        assert_eq!(recorded.status, 200);
        assert!(recorded.message.is_none());
        let data: serde_json::Value = serde_json::from_str(recorded.data.as_deref().unwrap()).unwrap();
        assert_eq!(data["name"], "user-10");
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&recorded.body).unwrap(), data);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(gridmi_call_is_finished(call));

        gridmi_call_free(call);
        gridmi_client_free(client);
    }

    #[test]
    fn multipart_upload_end_to_end() {
        let addr = start_server();
        let client = new_client(&format!("http://{addr}/API/"), 5000);

        let file = std::env::temp_dir().join(format!("gridmi-ffi-{}.bin", std::process::id()));
        std::fs::write(&file, [1u8, 2, 3, 4]).unwrap();

        let mp = gridmi_multipart_new();
        let field = CString::new("photo").unwrap();
        let file_path = CString::new(file.to_str().unwrap()).unwrap();
        assert_eq!(
            gridmi_multipart_append_file(mp, field.as_ptr(), file_path.as_ptr()),
            FfiErrorCode::Ok
        );
        let method = CString::new("POST").unwrap();
        let path = CString::new("photo/add").unwrap();
        let req = gridmi_request_new(method.as_ptr(), path.as_ptr());
        assert_eq!(gridmi_request_set_multipart(req, mp), FfiErrorCode::Ok);

        let (tx, rx) = mpsc::channel::<Recorded>();
        let call = gridmi_start(client, req, record, &tx as *const _ as *mut c_void);
        let recorded = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        std::fs::remove_file(&file).unwrap();

        assert_eq!(recorded.code, FfiErrorCode::Ok, "{:?}", recorded.message);
        let receipt: mock_server::UploadReceipt =
            serde_json::from_str(recorded.data.as_deref().unwrap()).unwrap();
        assert!(receipt.result);
        assert_eq!(receipt.parts[0].content, vec![1, 2, 3, 4]);

        gridmi_call_free(call);
        gridmi_client_free(client);
    }

    #[test]
    fn freeing_client_still_calls_back() {
        let addr = start_server();
        let client = new_client(&format!("http://{addr}/API/"), 5000);
        let path = CString::new("slow").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());
        let ms = CString::new("ms").unwrap();
        let delay = CString::new("300").unwrap();
        gridmi_request_add_param(req, ms.as_ptr(), delay.as_ptr());

        let (tx, rx) = mpsc::channel::<Recorded>();
        let call = gridmi_start(client, req, record, &tx as *const _ as *mut c_void);
        gridmi_client_free(client);

        let recorded = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(recorded.code, FfiErrorCode::Network);
        assert!(recorded.message.unwrap().contains("shutting down"));
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert!(gridmi_call_is_finished(call));
        gridmi_call_free(call);
    }

    #[test]
    fn decode_failure_reports_raw_body() {
        let addr = start_server();
        let client = new_client(&format!("http://{addr}/API/"), 5000);
        let path = CString::new("broken").unwrap();
        let req = gridmi_request_new(std::ptr::null(), path.as_ptr());

        let (tx, rx) = mpsc::channel::<Recorded>();
        let call = gridmi_start(client, req, record, &tx as *const _ as *mut c_void);
        let recorded = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(recorded.code, FfiErrorCode::Decode);
        assert_eq!(recorded.body, br#"{"result": tr"#);
        assert!(recorded.data.is_none());
        assert!(recorded.message.unwrap().starts_with("failed to decode response"));

        gridmi_call_free(call);
        gridmi_client_free(client);
    }
}
