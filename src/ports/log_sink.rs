use thiserror::Error;

use crate::core::access_log::LogRecord;

/// Error type for access log sinks
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    #[error("Log write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Log record rejected: {0}")]
    Rejected(String),
}

/// LogSink defines the port (interface) that receives finished access log records
///
/// One sink instance is shared by every in-flight request, so `write` may be called
/// from many tasks at once; serialising the actual output is the sink's job.
pub trait LogSink: Send + Sync + 'static {
    /// Write one record
    ///
    /// # Returns
    /// An error if the record could not be written. The pipeline reports it and
    /// carries on; it is never retried.
    fn write(&self, record: &LogRecord) -> Result<(), SinkError>;
}
