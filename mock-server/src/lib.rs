use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Query},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Key the demo app sends in `X-Key`.
pub const API_KEY: &str = "e10adc3949ba59abbe56e057f20f883e";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceivedPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub result: bool,
    pub parts: Vec<ReceivedPart>,
}

/// Everything the fallback route saw about a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Deserialize)]
pub struct Delay {
    #[serde(default)]
    pub ms: u64,
}

pub fn app() -> Router {
    Router::new()
        .route("/API/profile/get", get(get_profile))
        .route("/API/photo/add", post(add_photo))
        .route("/API/slow", get(slow))
        .route("/API/broken", get(broken))
        .fallback(echo)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn get_profile(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Profile>, StatusCode> {
    let key = headers.get("x-key").and_then(|v| v.to_str().ok());
    if key != Some(API_KEY) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let id = params
        .get("id")
        .ok_or(StatusCode::BAD_REQUEST)?
        .parse::<u64>()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(Profile {
        id,
        name: format!("user-{id}"),
    }))
}

async fn add_photo(mut multipart: Multipart) -> Result<Json<UploadReceipt>, StatusCode> {
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let content = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        parts.push(ReceivedPart {
            name,
            file_name,
            content_type,
            content: content.to_vec(),
        });
    }
    tracing::debug!(parts = parts.len(), "upload received");
    Ok(Json(UploadReceipt {
        result: parts.iter().any(|p| p.name == "photo"),
        parts,
    }))
}

async fn slow(Query(delay): Query<Delay>) -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(delay.ms)).await;
    Json(serde_json::json!({ "result": true }))
}

async fn broken() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"result": tr"#,
    )
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
