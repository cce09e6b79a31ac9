use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};

/// Field names whose values are credentials. Their values never reach the
/// log output in the clear, at any nesting of the emitted JSON.
const SENSITIVE_FIELDS: [&str; 8] = [
    "access_token",
    "refresh_token",
    "token",
    "password",
    "secret",
    "cookie",
    "cookies",
    "authorization",
];

fn is_sensitive_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_FIELDS.iter().any(|s| lower == *s)
}

/// Shorten a secret to a recognizable but unusable prefix.
pub fn redact(value: &str) -> String {
    if value.chars().count() <= 6 {
        "[redacted]".to_string()
    } else {
        let prefix: String = value.chars().take(6).collect();
        format!("{}…[redacted]", prefix)
    }
}

/// Replace sensitive values anywhere inside an attribute tree.
fn scrub(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_sensitive_field(key) {
                    *v = Value::from("[redacted]");
                } else {
                    scrub(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub(item);
            }
        }
        _ => {}
    }
}

#[derive(Default)]
struct JsonFieldVisitor {
    fields: Map<String, Value>,
}

impl JsonFieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if is_sensitive_field(field.name()) {
            self.fields
                .insert(field.name().to_string(), Value::from("[redacted]"));
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonFieldVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}

#[derive(Clone)]
struct JsonEventFormatter;

impl JsonEventFormatter {
    fn severity_number(level: &Level) -> u64 {
        match *level {
            Level::TRACE => 1,
            Level::DEBUG => 5,
            Level::INFO => 9,
            Level::WARN => 13,
            Level::ERROR => 17,
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonEventFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let mut visitor = JsonFieldVisitor::default();
        event.record(&mut visitor);

        let mut attributes = visitor.fields;
        if let Some(file) = metadata.file() {
            attributes.insert("code.filepath".to_string(), Value::from(file));
        }
        if let Some(line) = metadata.line() {
            attributes.insert("code.lineno".to_string(), Value::from(line));
        }
        attributes.insert("code.target".to_string(), Value::from(metadata.target()));

        let body = attributes
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| metadata.name().to_string());

        let mut root = Map::new();
        root.insert(
            "timestamp".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        root.insert(
            "severity_text".to_string(),
            Value::from(metadata.level().as_str()),
        );
        root.insert(
            "severity_number".to_string(),
            Value::from(Self::severity_number(metadata.level())),
        );
        root.insert("body".to_string(), Value::from(body));
        root.insert("attributes".to_string(), Value::Object(attributes));

        let mut json = Value::Object(root);
        // Fields whose values are structured debug dumps can still nest a
        // credential; scrub the whole tree before it is serialized.
        scrub(&mut json);
        let serialized = serde_json::to_string(&json).map_err(|_| std::fmt::Error)?;
        writer.write_str(&serialized)?;
        writer.write_char('\n')?;
        Ok(())
    }
}

pub fn init_logging(logging_config: &LoggingConfig) {
    // Parse level string -> LevelFilter
    let level_filter = match logging_config.level.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => {
            panic!(
                "Invalid logging.level '{}'. Valid values: trace, debug, info, warn, error",
                logging_config.level
            );
        }
    };

    // This can be used to allow env-based overrides, plus the default:
    let filter_layer = EnvFilter::default().add_directive(level_filter.into());

    // Forward log-crate records from dependencies into tracing.
    let _ = tracing_log::LogTracer::init();

    // HAKO_ENV=production forces structured output regardless of config.
    let format = match std::env::var("HAKO_ENV").as_deref() {
        Ok("production") => "json".to_string(),
        _ => logging_config.format.to_lowercase(),
    };

    match format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt::layer().event_format(JsonEventFormatter))
                .init();
        }
        _ => {
            // Human-readable console output with ANSI colors
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_never_exposes_short_secrets() {
        assert_eq!(redact("abc"), "[redacted]");
        let long = redact("super-secret-token-value");
        assert!(long.starts_with("super-"));
        assert!(!long.contains("token-value"));
    }

    #[test]
    fn test_scrub_redacts_at_any_depth() {
        let mut value = serde_json::json!({
            "attributes": {
                "endpoint": "/groups",
                "cookies": {"session": "abc"},
                "nested": [{"access_token": "tok-1"}]
            }
        });
        scrub(&mut value);
        assert_eq!(value["attributes"]["cookies"], "[redacted]");
        assert_eq!(value["attributes"]["nested"][0]["access_token"], "[redacted]");
        assert_eq!(value["attributes"]["endpoint"], "/groups");
    }

    #[test]
    fn test_sensitive_field_match_is_case_insensitive() {
        assert!(is_sensitive_field("Authorization"));
        assert!(is_sensitive_field("refresh_token"));
        assert!(!is_sensitive_field("token_count"));
    }
}
