//! Structured logging with an optional single-line JSON format

use serde_json::{json, Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::{LookupSpan, SpanRef},
    EnvFilter,
};

/// One JSON object per event: timestamp, level, target, message, fields, span stack
pub struct JsonFormatter;

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let message = visitor.fields.remove("message").unwrap_or(Value::Null);

        let line = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": metadata.level().as_str(),
            "target": metadata.target(),
            "message": message,
            "fields": visitor.fields,
            "spans": collect_spans(ctx.lookup_current().as_ref()),
        });

        writeln!(writer, "{}", line)
    }
}

#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields.insert(field.name().to_string(), json!(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

/// Innermost span first
fn collect_spans<S>(span: Option<&SpanRef<'_, S>>) -> Vec<Value>
where
    S: for<'a> LookupSpan<'a>,
{
    span.map(|span| span.scope().map(|s| json!({ "name": s.metadata().name(), "target": s.metadata().target() })).collect())
        .unwrap_or_default()
}

/// Install the global subscriber. `RUST_LOG` wins over `log_level` when set.
pub fn init_logging(log_level: &str, json_format: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let installed = if json_format {
        tracing_subscriber::fmt().with_env_filter(env_filter).event_format(JsonFormatter).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Submission of any transaction on behalf of the user
#[macro_export]
macro_rules! log_tx_submitted {
    ($kind:expr, $tx_hash:expr, $to:expr) => {
        tracing::info!(
            kind = $kind,
            tx_hash = ?$tx_hash,
            to = ?$to,
            event_type = "tx_submitted",
            "Transaction submitted"
        );
    };
}

#[macro_export]
macro_rules! log_action_failed {
    ($action:expr, $error:expr) => {
        tracing::error!(
            action = $action,
            error_kind = $error.kind(),
            error = %$error,
            event_type = "action_failed",
            "Vault action failed"
        );
    };
}
