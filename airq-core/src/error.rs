use thiserror::Error;

/// The payload does not have the shape the normalizer can work with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("payload is not a JSON object (found {found})")]
    NotAnObject { found: &'static str },

    #[error("payload has no `list` key")]
    MissingList,

    #[error("payload `list` is not an array (found {found})")]
    ListNotArray { found: &'static str },

    #[error("reading #{index} in `list` is not a JSON object (found {found})")]
    ReadingNotObject { index: usize, found: &'static str },
}

/// A single reading lacks a value the record expects.
///
/// Never fatal: the affected field holds `None` and the issue is kept on the
/// record so callers can decide whether to keep it.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartialDataError {
    #[error("missing field `{field}`")]
    MissingField { field: String },

    #[error("field `{field}` is not numeric (found {found})")]
    NotNumeric { field: String, found: String },

    #[error("timestamp `{value}` is out of range")]
    InvalidTimestamp { value: String },

    #[error("coordinate has `{present}` but not `{missing}`")]
    PartialCoordinate { present: String, missing: String },
}

/// Network, API or credential failure while talking to the upstream service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error(
        "No API key configured for '{service}'.\n\
         Hint: run `airq configure {service}` or set {env_var}."
    )]
    MissingCredential {
        service: &'static str,
        env_var: &'static str,
    },

    #[error("request to {endpoint} failed")]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} request failed with status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse {endpoint} JSON")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no location found for '{place}'")]
    PlaceNotFound { place: String },
}

/// Anything that ends a fetch-normalize cycle.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
