//! Response decoding.
//!
//! The body is decoded according to the client's `PayloadType` before the
//! handler sees it. The raw bytes always travel with the result: on success
//! in `Response::raw`, on failure inside `ClientError::Decode`.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::PayloadType;
use crate::error::{ClientError, ClientResult};
use crate::http::{find_header, HttpResponse};

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Data {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.as_json().and_then(Value::as_object)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Data::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Decode `raw` as `payload`.
pub fn decode(raw: &[u8], payload: PayloadType) -> ClientResult<Data> {
    let fail = |message: String| ClientError::Decode {
        message,
        raw: raw.to_vec(),
    };
    match payload {
        PayloadType::JsonObject => {
            let value: Value = serde_json::from_slice(raw).map_err(|e| fail(e.to_string()))?;
            if !value.is_object() {
                return Err(fail(format!("expected a JSON object, got {}", kind(&value))));
            }
            Ok(Data::Json(value))
        }
        PayloadType::Json => serde_json::from_slice(raw)
            .map(Data::Json)
            .map_err(|e| fail(e.to_string())),
        PayloadType::Text => String::from_utf8(raw.to_vec())
            .map(Data::Text)
            .map_err(|e| fail(e.to_string())),
        PayloadType::Bytes => Ok(Data::Bytes(raw.to_vec())),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A completed, successfully decoded response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    raw: Vec<u8>,
    data: Data,
}

impl Response {
    /// Check the status and decode the body of a wire response.
    pub fn from_http(response: HttpResponse, payload: PayloadType) -> ClientResult<Self> {
        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let data = decode(&response.body, payload)?;
        Ok(Self {
            status: response.status,
            headers: response.headers,
            raw: response.body,
            data,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn into_data(self) -> Data {
        self.data
    }

    /// Deserialize the JSON payload into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        let value = match &self.data {
            Data::Json(v) => v.clone(),
            _ => serde_json::from_slice(&self.raw).map_err(|e| ClientError::Decode {
                message: e.to_string(),
                raw: self.raw.clone(),
            })?,
        };
        serde_json::from_value(value).map_err(|e| ClientError::Decode {
            message: e.to_string(),
            raw: self.raw.clone(),
        })
    }
}
