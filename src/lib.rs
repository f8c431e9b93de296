//! Trailhead - an HTTP request pipeline with correlated, privacy-redacted
//! access logs and panic recovery.
//!
//! Every request passing through the pipeline gets:
//! - a correlation id (UUID v4) in the `X-Request-ID` response header, in the
//!   request extensions as [`RequestId`], and on the `request` tracing span
//! - exactly one structured access log record, with path parameters, query
//!   string and (for JSON, form and multipart bodies) body fields, sensitive
//!   values replaced by same-length `*` masks
//! - containment of handler panics: the client gets a 500 envelope and the
//!   record carries the resolved call site of the panic
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use trailhead::{adapters::JsonLineSink, config::Settings};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let settings = Settings::default();
//! let app = trailhead::adapters::app(&settings, Arc::new(JsonLineSink::new(std::io::stdout)))?;
//! let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! Custom routes are registered through [`NamedRouter`] and wrapped with
//! [`Pipeline::apply`]; the route name given to [`NamedRouter::named`] is what
//! the redaction policy matches on.
//!
//! # Architecture
//! Ports (traits) live in [`ports`], their implementations and the axum glue in
//! [`adapters`], and the request-independent logic (redaction, record
//! assembly, panic containment) in [`core`].
//!
//! # Error Handling
//! Library errors are `thiserror` enums; application plumbing returns
//! `eyre::Result<T>` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{Envelope, JsonLineSink, NamedRouter, Pipeline},
    core::{LogRecord, RequestId, Severity},
    ports::LogSink,
    utils::GracefulShutdown,
};
