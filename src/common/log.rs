//! Logging setup.
//!
//! Uses `tracing` with an env-filter; a host application may additionally
//! install a log-handler callback which receives every event this crate
//! emits, so embedders without their own `tracing` subscriber still get
//! diagnostics.

use std::fmt::Write as _;
use std::sync::OnceLock;

use parking_lot::RwLock;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::common::config::{LogHandler, LogLevel};

static HANDLER: RwLock<Option<LogHandler>> = RwLock::new(None);
static INIT: OnceLock<()> = OnceLock::new();

/// Installs (or clears) the process-wide log-handler callback.
pub fn set_log_handler(handler: Option<LogHandler>) {
    *HANDLER.write() = handler;
}

/// Initializes the global subscriber. Safe to call more than once; only the
/// first call wins. Embedders that already installed a subscriber can skip
/// this and rely on [`set_log_handler`] alone via [`handler_layer`].
pub fn init_logging(debug: bool) {
    INIT.get_or_init(|| {
        let default_filter = if debug { "panoptes=debug" } else { "panoptes=info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .with(HandlerLayer)
            .try_init();
    });
}

/// The forwarding layer, exposed for embedders composing their own registry.
pub fn handler_layer() -> HandlerLayer {
    HandlerLayer
}

pub struct HandlerLayer;

impl<S: Subscriber> Layer<S> for HandlerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let guard = HANDLER.read();
        let Some(handler) = guard.as_ref() else {
            return;
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = match *event.metadata().level() {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        };
        let details = (!visitor.details.is_empty()).then_some(visitor.details.as_str());
        handler(level, &visitor.message, details);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    details: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            if !self.details.is_empty() {
                self.details.push(' ');
            }
            let _ = write!(self.details, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.details.is_empty() {
                self.details.push(' ');
            }
            let _ = write!(self.details, "{}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    fn handler_receives_events_with_details() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        set_log_handler(Some(Arc::new(move |level, message, details| {
            assert_eq!(level, LogLevel::Warn);
            assert_eq!(message, "watcher failed");
            assert!(details.unwrap_or_default().contains("pid=42"));
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })));

        let subscriber = tracing_subscriber::registry().with(HandlerLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(pid = 42, "watcher failed");
        });

        set_log_handler(None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
