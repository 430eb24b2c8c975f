//! Error types for the realtime server.
//!
//! Each layer has its own error enum so callers can tell a malformed client
//! request apart from a disk failure. [`ServerError`] is the top-level type
//! returned by the accept loop and connection tasks.

use std::io::Error as IoError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the persistent store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to create file {0}: {1}")]
    FileCreate(PathBuf, IoError),

    #[error("Failed to write to file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to sync file {0}: {1}")]
    FileSync(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to serialize store: {0}")]
    Serialization(serde_json::Error),

    #[error("Failed to deserialize file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("File {0} does not contain a JSON object at the top level")]
    NotAnObject(PathBuf),
}

/// Rejected in-memory store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Field '{field}' not found in key '{key}'")]
    FieldNotFound { key: String, field: String },

    #[error("Item with id '{id}' not found in key '{key}'")]
    ItemNotFound { key: String, id: String },

    #[error("Key '{0}' does not hold an array")]
    NotAnArray(String),

    #[error("Key '{0}' holds an object; update body must be an object")]
    NotAnObject(String),
}

/// Route table registration conflicts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route pattern must start with '/': {0}")]
    InvalidPattern(String),

    #[error("Route {method} {pattern} is already registered")]
    Duplicate { method: String, pattern: String },

    #[error("Route {method} {pattern} overlaps existing route {existing}")]
    Ambiguous {
        method: String,
        pattern: String,
        existing: String,
    },
}

/// Problems reading an HTTP request off the wire.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Request body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("Connection closed in the middle of a request")]
    UnexpectedEof,
}

impl HttpError {
    /// HTTP status that should be reported back for this failure, if the
    /// connection is still usable for a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Io(_) | HttpError::UnexpectedEof => None,
            HttpError::HeadTooLarge(_) => Some(431),
            HttpError::BodyTooLarge { .. } => Some(413),
            _ => Some(400),
        }
    }
}

/// Outcome of an HTTP API handler that did not succeed.
///
/// Every variant maps to a status code and is rendered through the
/// `error()` response helper as `{ "error": true, "message": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Failed to persist data")]
    Persistence(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::KeyNotFound(_)
            | StoreError::FieldNotFound { .. }
            | StoreError::ItemNotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::NotAnArray(_) | StoreError::NotAnObject(_) => {
                ApiError::BadRequest(e.to_string())
            }
        }
    }
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Persistence(_) | ApiError::Internal(_) => 500,
        }
    }
}

/// Top-level server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or accepting on the listen socket failed
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type ApiResult<T> = Result<T, ApiError>;
