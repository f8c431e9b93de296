pub mod handlers;
pub mod json_line_sink;
pub mod middleware;
pub mod response;
pub mod rotating_file;
pub mod routes;

/// Re-export commonly used types from adapters
pub use middleware::{
    AccessLogState, CorsHeaders, access_log_middleware, cors_middleware, request_id_middleware,
    security_headers_middleware,
};
pub use json_line_sink::JsonLineSink;
pub use response::{Envelope, FieldError};
pub use rotating_file::RotatingFileWriter;
pub use routes::{NamedRouter, Pipeline, app};
