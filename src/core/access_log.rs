//! Assembly and emission of the single access log record of a request.
//!
//! A [`RequestSnapshot`] is taken before the downstream chain runs (the request
//! itself moves into the chain), and [`AccessLogEmitter::emit`] combines it with
//! what came back: a response, or a recovered [`Fault`] plus the 500 written in
//! its place. Both paths go through the same `emit`, once per request.
use std::{sync::Arc, time::Duration};

use axum::{
    body::{Body, HttpBody},
    extract::{FromRequestParts, MatchedPath, RawPathParams, Request},
    http::{
        HeaderName, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    },
    response::Response,
};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    core::{
        correlation::RequestId,
        payload::{BodyKind, Payload},
        recovery::Fault,
        redaction::Redactor,
        route_names::RouteNames,
    },
    ports::LogSink,
};

/// Log level of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// 4xx warn, 5xx error, everything else info.
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Severity::Error
        } else if status.is_client_error() {
            Severity::Warn
        } else {
            Severity::Info
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

/// The structured access log entry: fixed schema fields first, then path
/// parameters, query fields, body fields and, for recovered panics, `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    severity: Severity,
    message: String,
    fields: Map<String, Value>,
}

impl LogRecord {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            fields: Map::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// All fields in insertion order
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn request_id(&self) -> &str {
        self.get_str(fields::REQUEST_ID).unwrap_or_default()
    }
}

/// Names of the fixed record fields.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const NAME: &str = "name";
    pub const BYTES: &str = "bytes";
    pub const DURATION: &str = "duration";
    pub const USER_AGENT: &str = "user-agent";
    pub const REQUEST_ID: &str = "request-id";
    pub const ERROR: &str = "error";

    pub const FIXED: [&str; 8] = [
        STATUS, METHOD, PATH, NAME, BYTES, DURATION, USER_AGENT, REQUEST_ID,
    ];
}

/// Why a request body could not be buffered for logging.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BodyCaptureError {
    #[error("Request body exceeds maximum size of {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Failed to read request body: {0}")]
    Read(String),
}

/// Request metadata the access log needs once the handler is done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub route_name: String,
    /// Path parameters in declaration order
    pub params: Vec<(String, String)>,
    pub query: Option<String>,
    pub user_agent: String,
    pub request_id: String,
    /// Parsed copy of the body, for the encodings that are logged
    pub payload: Option<Payload>,
}

impl RequestSnapshot {
    /// Record request metadata and, for a logged encoding, buffer the body.
    ///
    /// The returned request carries exactly the bytes that were read, so the
    /// handler sees the body unchanged. On a capture error the snapshot is still
    /// returned so the rejection can be logged.
    pub async fn capture(
        request: Request,
        route_names: &RouteNames,
        max_body_bytes: usize,
    ) -> (Self, Result<Request, BodyCaptureError>) {
        let (mut parts, body) = request.into_parts();

        let route_name = parts
            .extensions
            .get::<MatchedPath>()
            .and_then(|matched| route_names.lookup(&parts.method, matched.as_str()))
            .unwrap_or_default()
            .to_string();
        let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
            Ok(params) => params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        let header = |name: HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let content_type = header(CONTENT_TYPE);

        let mut snapshot = Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            route_name,
            params,
            query: parts
                .uri
                .query()
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            user_agent: header(USER_AGENT),
            request_id: parts
                .extensions
                .get::<RequestId>()
                .map(|id| id.0.clone())
                .unwrap_or_default(),
            payload: None,
        };

        let Some(kind) = BodyKind::from_content_type(&content_type) else {
            return (snapshot, Ok(Request::from_parts(parts, body)));
        };

        match axum::body::to_bytes(body, max_body_bytes).await {
            Ok(bytes) => {
                snapshot.payload = Some(Payload::parse(kind, &content_type, bytes.clone()).await);
                (snapshot, Ok(Request::from_parts(parts, Body::from(bytes))))
            }
            Err(e) => {
                let error = match e.into_inner() {
                    inner if inner.downcast_ref::<LengthLimitError>().is_some() => {
                        BodyCaptureError::TooLarge {
                            limit: max_body_bytes,
                        }
                    }
                    inner => BodyCaptureError::Read(inner.to_string()),
                };
                (snapshot, Err(error))
            }
        }
    }
}

/// Status and body length of a response, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub bytes: u64,
}

impl ResponseMeta {
    pub fn of(response: &Response) -> Self {
        let bytes = response.body().size_hint().exact().unwrap_or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        });
        Self {
            status: response.status(),
            bytes,
        }
    }
}

/// Builds records and hands them to the configured [`LogSink`].
#[derive(Clone)]
pub struct AccessLogEmitter {
    redactor: Redactor,
    sink: Arc<dyn LogSink>,
}

impl AccessLogEmitter {
    pub fn new(redactor: Redactor, sink: Arc<dyn LogSink>) -> Self {
        Self { redactor, sink }
    }

    pub fn build_record(
        &self,
        snapshot: &RequestSnapshot,
        response: ResponseMeta,
        elapsed: Duration,
        fault: Option<&Fault>,
    ) -> LogRecord {
        let severity = match fault {
            Some(_) => Severity::Error,
            None => Severity::for_status(response.status),
        };
        let mut record = LogRecord::new(
            severity,
            response.status.canonical_reason().unwrap_or_default(),
        );

        record.insert(fields::STATUS, response.status.as_u16());
        record.insert(fields::METHOD, snapshot.method.as_str());
        record.insert(fields::PATH, snapshot.path.as_str());
        record.insert(fields::NAME, snapshot.route_name.as_str());
        record.insert(fields::BYTES, response.bytes);
        record.insert(
            fields::DURATION,
            humantime::format_duration(elapsed).to_string(),
        );
        record.insert(fields::USER_AGENT, snapshot.user_agent.as_str());
        record.insert(fields::REQUEST_ID, snapshot.request_id.as_str());

        for (name, value) in &snapshot.params {
            record.insert(format!("param_{name}"), value.as_str());
        }
        if let Some(query) = &snapshot.query {
            for (key, value) in self.redactor.query_fields(query) {
                record.insert(key, value);
            }
        }
        if let Some(payload) = &snapshot.payload {
            for (key, value) in self.redactor.body_fields(payload, &snapshot.route_name) {
                record.insert(key, value);
            }
        }
        if let Some(fault) = fault {
            record.insert(fields::ERROR, fault.to_string());
        }

        record
    }

    /// Build and write the record. A sink failure is reported, never propagated.
    pub fn emit(
        &self,
        snapshot: &RequestSnapshot,
        response: ResponseMeta,
        elapsed: Duration,
        fault: Option<&Fault>,
    ) {
        let record = self.build_record(snapshot, response, elapsed, fault);
        if let Err(e) = self.sink.write(&record) {
            tracing::error!(
                request_id = %snapshot.request_id,
                error = %e,
                "write access log failed"
            );
        }
    }
}
