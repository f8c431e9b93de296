pub mod access_log;
pub mod correlation;
pub mod payload;
pub mod recovery;
pub mod redaction;
pub mod route_names;

pub use access_log::{AccessLogEmitter, LogRecord, RequestSnapshot, ResponseMeta, Severity};
pub use correlation::{REQUEST_ID_HEADER, RequestId};
pub use recovery::{Fault, PanicGuard};
pub use redaction::Redactor;
pub use route_names::RouteNames;
