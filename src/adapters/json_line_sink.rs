use std::io::Write;

use serde_json::{Map, Value};
use tracing_subscriber::fmt::MakeWriter;

use crate::{
    core::access_log::LogRecord,
    ports::{LogSink, SinkError},
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// [`LogSink`] writing each record as one flat JSON object per line.
///
/// Line layout: `time`, `level`, the context fields, every record field in
/// record order (typed as recorded), then `message`. Output goes through a
/// `tracing_subscriber` [`MakeWriter`], so the rotating log file and stdout
/// both work; each line is handed over in a single `write_all`.
#[derive(Debug, Clone)]
pub struct JsonLineSink<M> {
    make_writer: M,
    context: Map<String, Value>,
}

impl<M> JsonLineSink<M>
where
    M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    pub fn new(make_writer: M) -> Self {
        Self {
            make_writer,
            context: Map::new(),
        }
    }

    /// Add a field written on every line, after `level`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    fn line(&self, record: &LogRecord) -> Map<String, Value> {
        let mut line = Map::new();
        line.insert(
            "time".to_string(),
            Value::String(chrono::Local::now().format(TIME_FORMAT).to_string()),
        );
        line.insert(
            "level".to_string(),
            Value::String(record.severity().as_str().to_string()),
        );
        line.extend(self.context.iter().map(|(k, v)| (k.clone(), v.clone())));
        line.extend(record.fields().iter().map(|(k, v)| (k.clone(), v.clone())));
        line.insert(
            "message".to_string(),
            Value::String(record.message().to_string()),
        );
        line
    }
}

impl<M> LogSink for JsonLineSink<M>
where
    M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut bytes = serde_json::to_vec(&self.line(record))
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        bytes.push(b'\n');

        let mut writer = self.make_writer.make_writer();
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::rotating_file::RotatingFileWriter,
        core::access_log::{Severity, fields},
    };

    fn record() -> LogRecord {
        let mut record = LogRecord::new(Severity::Warn, "Not Found");
        record.insert(fields::STATUS, 404);
        record.insert(fields::METHOD, "GET");
        record.insert(fields::BYTES, 27u64);
        record.insert(fields::USER_AGENT, "curl/8.0");
        record.insert(fields::REQUEST_ID, "abc");
        record.insert("param_id", "7");
        record.insert("query_password", "****");
        record
    }

    fn lines(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_record_is_written_as_flat_typed_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        let writer =
            RotatingFileWriter::new(&path, 1024 * 1024, std::time::Duration::from_secs(60))
                .unwrap();
        let sink = JsonLineSink::new(writer).with_field("tier", "prod");

        sink.write(&record()).unwrap();
        sink.write(&record()).unwrap();

        let lines = lines(&path);
        assert_eq!(lines.len(), 2);
        let line = lines[0].as_object().unwrap();
        assert_eq!(line["level"], json!("warn"));
        assert_eq!(line["tier"], json!("prod"));
        assert_eq!(line["status"], json!(404));
        assert_eq!(line["bytes"], json!(27));
        assert_eq!(line["user-agent"], json!("curl/8.0"));
        assert_eq!(line["request-id"], json!("abc"));
        assert_eq!(line["query_password"], json!("****"));
        assert_eq!(line["message"], json!("Not Found"));
        assert!(!line.contains_key("fields"));

        let keys: Vec<&str> = line.keys().map(String::as_str).collect();
        assert_eq!(&keys[..4], &["time", "level", "tier", "status"]);
        assert_eq!(keys.last(), Some(&"message"));
    }

    #[test]
    fn test_write_to_discarding_writer_succeeds() {
        assert!(JsonLineSink::new(std::io::sink).write(&record()).is_ok());
    }
}
