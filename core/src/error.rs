//! Error types for the Parse REST client.
//!
//! # Design
//! The four status codes the service documents (400, 401, 403, 404) get
//! dedicated variants carrying the raw response body, because callers
//! routinely branch on them. Every other non-2xx response lands in `Service`
//! with the status and body retained for debugging. Client-side misuse
//! (query cardinality, filter composition, codec tags, relation targets) has
//! its own variants so it is never confused with a server answer.

use thiserror::Error;

/// Errors returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The server returned 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The server returned 401, or a user operation was attempted without a
    /// session token.
    #[error("login required: {0}")]
    LoginRequired(String),

    /// The server returned 403.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The server returned 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-2xx status.
    #[error("HTTP {status}: {body}")]
    Service { status: u16, body: String },

    /// `Query::get` matched no rows.
    #[error("query returned no results")]
    DoesNotExist,

    /// `Query::get` matched more than one row.
    #[error("query expected one result, got {0}")]
    MultipleResultsReturned(usize),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A `__type` tag this client does not understand.
    #[error("unknown wire type: {0}")]
    UnknownWireType(String),

    /// A tagged value whose payload is malformed.
    #[error("invalid wire value for '{key}': {reason}")]
    InvalidWireValue { key: String, reason: String },

    #[error("object id can not be re-set")]
    ObjectIdAlreadySet,

    /// Bookkeeping names (`objectId`, `createdAt`, ...) are not fields.
    #[error("'{0}' is a reserved field name")]
    ReservedField(String),

    #[error("field '{0}' is not numeric")]
    NotNumeric(String),

    /// The operation needs an object id and the resource was never saved.
    #[error("{0} has not been saved")]
    Unsaved(String),

    #[error("invalid relation target: {0}")]
    InvalidRelationTarget(String),

    /// Item `index` of a batch request failed.
    #[error("batch item {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<ParseError>,
    },

    /// An application-level error reported inside a 2xx envelope, such as a
    /// failed batch item.
    #[error("service error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The request never produced an HTTP response.
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("missing connection credentials")]
    MissingCredentials,

    /// A privileged operation was attempted without a configured master key.
    #[error("{0} requires the master key")]
    MasterKeyRequired(&'static str),

    #[error("invalid API root: {0}")]
    InvalidApiRoot(String),
}

impl ParseError {
    /// Map a non-success status code and its raw body to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => ParseError::BadRequest(body),
            401 => ParseError::LoginRequired(body),
            403 => ParseError::Forbidden(body),
            404 => ParseError::NotFound(body),
            _ => ParseError::Service { status, body },
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ParseError>;
