//! Unified JSON logging with custom format.
//!
//! Log format:
//! ```json
//! {"ts":"2024-12-28T15:04:05.123Z","level":"info","type":"app","msg":"worker pool online","ctx":{"service":"tokio_workers","pool":"jobs"},"data":{"workers":4}}
//! ```
//!
//! `type` is `worker` for lines forwarded from a worker process, `error` for
//! error-level events and `app` otherwise.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber described by `config`.
///
/// Logs go to stderr; stdout belongs to the binary's results. An unparsable
/// filter falls back to `tokio_workers=info`.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new("tokio_workers=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(config.service_name.clone()))
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
}

/// Log entry with unified structure.
#[derive(Serialize)]
struct LogEntry<'a> {
    /// ISO 8601 timestamp with milliseconds, UTC
    ts: &'a str,
    level: &'a str,
    #[serde(rename = "type")]
    log_type: &'a str,
    msg: &'a str,
    ctx: LogContext<'a>,
    data: &'a BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct LogContext<'a> {
    service: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pool: Option<&'a str>,
}

/// Custom JSON formatter for tracing.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let level = match *meta.level() {
            Level::TRACE | Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let log_type = if visitor.fields.contains_key("stream") {
            "worker"
        } else if *meta.level() == Level::ERROR {
            "error"
        } else {
            "app"
        };

        // The pool name moves from data to ctx.
        let pool = visitor.fields.remove("pool");
        let ts = Iso8601Timestamp::now();

        let entry = LogEntry {
            ts: ts.as_str(),
            level,
            log_type,
            msg: visitor.message.as_deref().unwrap_or_default(),
            ctx: LogContext {
                service: &self.service_name,
                pool: pool.as_ref().and_then(|v| v.as_str()),
            },
            data: &visitor.fields,
        };

        let line = serde_json::to_string(&entry).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{}", line)
    }
}

/// Field visitor for collecting tracing fields.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, serde_json::Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &tracing::field::Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field, serde_json::Value::String(rendered));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, serde_json::json!(value));
    }
}

/// ISO 8601 UTC timestamp with millisecond precision.
///
/// Stack-allocated, no heap allocation.
#[derive(Clone, Copy)]
pub struct Iso8601Timestamp {
    buf: [u8; 24],
}

impl Iso8601Timestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_duration(since_epoch)
    }

    /// Create from a Duration since UNIX_EPOCH.
    pub fn from_duration(duration: Duration) -> Self {
        let secs = duration.as_secs();
        let (year, month, day) = civil_from_days(secs / 86_400);
        let day_secs = secs % 86_400;

        let mut buf = *b"0000-00-00T00:00:00.000Z";
        write_digits(&mut buf[0..4], u64::from(year));
        write_digits(&mut buf[5..7], u64::from(month));
        write_digits(&mut buf[8..10], u64::from(day));
        write_digits(&mut buf[11..13], day_secs / 3600);
        write_digits(&mut buf[14..16], (day_secs % 3600) / 60);
        write_digits(&mut buf[17..19], day_secs % 60);
        write_digits(&mut buf[20..23], u64::from(duration.subsec_millis()));

        Self { buf }
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII digits and separators are ever written.
        std::str::from_utf8(&self.buf).unwrap_or("1970-01-01T00:00:00.000Z")
    }
}

impl std::fmt::Display for Iso8601Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Iso8601Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert days since 1970-01-01 to (year, month, day).
fn civil_from_days(days: u64) -> (u32, u32, u32) {
    // Shift the epoch to 0000-03-01 so leap days fall at the end of a year.
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year as u32, month as u32, day as u32)
}

/// Write `val` as zero-padded decimal filling `buf`.
fn write_digits(buf: &mut [u8], mut val: u64) {
    for slot in buf.iter_mut().rev() {
        *slot = b'0' + (val % 10) as u8;
        val /= 10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_timestamp_format() {
        // 2024-01-15T10:50:45.123Z
        let ts = Iso8601Timestamp::from_duration(Duration::from_millis(1_705_315_845_123));
        assert_eq!(ts.as_str(), "2024-01-15T10:50:45.123Z");
    }

    #[test]
    fn test_iso8601_timestamp_epoch() {
        let ts = Iso8601Timestamp::from_duration(Duration::ZERO);
        assert_eq!(ts.as_str(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_iso8601_timestamp_leap_day() {
        let ts = Iso8601Timestamp::from_duration(Duration::new(1_709_208_000, 500_000_000));
        assert_eq!(ts.as_str(), "2024-02-29T12:00:00.500Z");

        // Day after the leap day
        let ts = Iso8601Timestamp::from_duration(Duration::from_secs(1_709_251_200));
        assert_eq!(ts.to_string(), "2024-03-01T00:00:00.000Z");
    }

    #[test]
    fn test_iso8601_timestamp_year_end() {
        // 1999-12-31T23:59:59.999Z
        let ts = Iso8601Timestamp::from_duration(Duration::from_millis(946_684_799_999));
        assert_eq!(ts.as_str(), "1999-12-31T23:59:59.999Z");
    }

    #[test]
    fn test_field_visitor_splits_message() {
        use tracing_subscriber::fmt::MakeWriter;

        #[derive(Clone, Default)]
        struct Buffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Buffer {
            fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(bytes);
                Ok(bytes.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl<'a> MakeWriter<'a> for Buffer {
            type Writer = Buffer;

            fn make_writer(&'a self) -> Self::Writer {
                self.clone()
            }
        }

        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .event_format(JsonFormatter::new("svc"))
                .with_writer(buffer.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(pool = "jobs", workers = 4u64, "worker pool online");
            tracing::warn!(pid = 7u64, stream = "stderr", "oops");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["msg"], "worker pool online");
        assert_eq!(lines[0]["type"], "app");
        assert_eq!(lines[0]["ctx"]["service"], "svc");
        assert_eq!(lines[0]["ctx"]["pool"], "jobs");
        assert_eq!(lines[0]["data"]["workers"], 4);
        assert!(lines[0]["data"].get("pool").is_none());

        assert_eq!(lines[1]["type"], "worker");
        assert_eq!(lines[1]["level"], "warn");
    }
}
