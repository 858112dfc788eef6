use clap::ValueEnum;
use serde_json::json;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::error;
use uuid::Uuid;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes one line per request, to stdout unless another sink is given.
pub struct AccessLogger {
    sink: Sink,
    format: AccessLogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AccessLogFormat {
    Json,
    Common,
    #[default]
    Combined,
}

#[derive(Debug)]
pub struct LogEntry {
    pub request_id: Uuid,
    pub remote_addr: String,
    pub method: String,
    pub uri: String,
    pub version: String,
    pub status: u16,
    pub response_size: Option<u64>,
    pub duration_ms: f64,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

impl AccessLogger {
    pub fn stdout(format: AccessLogFormat) -> Self {
        Self::with_writer(Box::new(io::stdout()), format)
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, format: AccessLogFormat) -> Self {
        Self {
            sink: Arc::new(Mutex::new(writer)),
            format,
        }
    }

    pub fn log(&self, entry: &LogEntry) {
        let log_line = self.format_entry(entry);

        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(sink, "{}", log_line) {
            error!("Failed to write access log: {}", e);
        }
        if let Err(e) = sink.flush() {
            error!("Failed to flush access log: {}", e);
        }
    }

    pub fn format_entry(&self, entry: &LogEntry) -> String {
        let size = entry
            .response_size
            .map(|size| size.to_string())
            .unwrap_or_else(|| "-".to_string());

        match self.format {
            AccessLogFormat::Json => json!({
                "timestamp": entry.timestamp.to_rfc3339(),
                "request_id": entry.request_id.to_string(),
                "remote_addr": entry.remote_addr,
                "method": entry.method,
                "uri": entry.uri,
                "protocol": entry.version,
                "status": entry.status,
                "response_size": entry.response_size,
                "duration_ms": entry.duration_ms,
                "user_agent": entry.user_agent,
                "referer": entry.referer
            })
            .to_string(),
            AccessLogFormat::Common => {
                format!(
                    "{} - - [{}] \"{} {} {}\" {} {}",
                    entry.remote_addr,
                    entry.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    entry.method,
                    entry.uri,
                    entry.version,
                    entry.status,
                    size
                )
            }
            AccessLogFormat::Combined => {
                format!(
                    "{} - - [{}] \"{} {} {}\" {} {} \"{}\" \"{}\"",
                    entry.remote_addr,
                    entry.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    entry.method,
                    entry.uri,
                    entry.version,
                    entry.status,
                    size,
                    entry.referer.as_deref().unwrap_or("-"),
                    entry.user_agent.as_deref().unwrap_or("-")
                )
            }
        }
    }
}
