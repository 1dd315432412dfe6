//! Shared request and response helpers for the route handlers

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{HeaderMap, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::{debug, error, warn};

use crate::auth::{extract_token_from_header, Actor};
use crate::server::AppState;
use crate::services::EvidenceUpload;
use crate::types::{ConvenioError, Result};

pub type FullBody = Full<Bytes>;

/// Limit for plain JSON bodies; uploads use the configured limit instead
pub const MAX_JSON_BODY: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// =============================================================================
// Responses
// =============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn error_response(status: StatusCode, error: &str, code: &str) -> Response<FullBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        },
    )
}

/// Render an error as `{error, code}` with its status
pub fn error_from(err: &ConvenioError) -> Response<FullBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(code = err.code(), error = %err, "Request failed");
    } else {
        debug!(code = err.code(), error = %err, "Request rejected");
    }
    error_response(status, err.message(), err.code())
}

/// Collapse a handler result into a response
pub fn respond(result: Result<Response<FullBody>>) -> Response<FullBody> {
    result.unwrap_or_else(|e| error_from(&e))
}

/// Raw bytes with an explicit content type, optionally as a download
pub fn file_response(content_type: &str, data: Bytes, download_name: Option<&str>) -> Response<FullBody> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Content-Length", data.len());
    if let Some(name) = download_name {
        builder = builder.header(
            "Content-Disposition",
            format!("attachment; filename=\"{name}\""),
        );
    }
    builder.body(Full::new(data)).unwrap()
}

// =============================================================================
// Requests
// =============================================================================

/// Read a whole request body, rejecting anything over `limit` bytes
pub async fn read_body<B>(req: Request<B>, limit: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ConvenioError::BadRequest("Request body too large".into())
            } else {
                ConvenioError::Http(format!("Failed to read body: {e}"))
            }
        })?;
    Ok(body.to_bytes())
}

pub async fn parse_json_body<T, B>(req: Request<B>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(req, MAX_JSON_BODY).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ConvenioError::BadRequest(format!("Invalid JSON: {e}")))
}

/// Whether the request carries a multipart/form-data body
pub fn is_multipart<B>(req: &Request<B>) -> bool {
    content_type(req).is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

fn content_type<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

pub fn parse_id(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| ConvenioError::BadRequest(format!("Invalid id: {raw}")))
}

/// Resolve the acting user from the bearer token
pub async fn require_actor(headers: &HeaderMap, state: &AppState) -> Result<Actor> {
    let header = headers
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = extract_token_from_header(header)
        .ok_or_else(|| ConvenioError::Unauthorized("No token provided".into()))?;

    let result = state.jwt.verify_token(token);
    let claims = match (result.valid, result.claims) {
        (true, Some(claims)) => claims,
        _ => {
            let reason = result.error.unwrap_or_else(|| "Invalid token".to_string());
            warn!(reason = %reason, "Rejected bearer token");
            return Err(ConvenioError::Unauthorized(reason));
        }
    };

    state.users.actor(claims.sub).await
}

// =============================================================================
// Multipart
// =============================================================================

/// A file part of a multipart body
#[derive(Debug, Clone)]
pub struct FilePart {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FilePart {
    /// Browsers send an empty, unnamed part when no file was picked
    pub fn is_blank(&self) -> bool {
        self.data.is_empty() && self.filename.as_deref().unwrap_or("").is_empty()
    }

    pub fn into_evidence(self) -> Result<EvidenceUpload> {
        EvidenceUpload::new(self.filename, self.content_type, self.data)
    }
}

/// Text fields and file parts of a multipart/form-data body
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, FilePart>,
}

impl MultipartForm {
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).cloned()
    }

    /// Take a non-blank file part
    pub fn take_file(&mut self, name: &str) -> Option<FilePart> {
        self.files.remove(name).filter(|f| !f.is_blank())
    }
}

pub async fn parse_multipart<B>(req: Request<B>, limit: usize) -> Result<MultipartForm>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boundary = multer::parse_boundary(content_type(&req).unwrap_or_default())?;
    let body = read_body(req, limit).await?;

    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut form = MultipartForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(|m| m.essence_str().to_string());
                let data = field.bytes().await?;
                form.files.insert(
                    name,
                    FilePart {
                        filename: Some(filename),
                        content_type,
                        data,
                    },
                );
            }
            None => {
                form.fields.insert(name, field.text().await?);
            }
        }
    }

    Ok(form)
}
