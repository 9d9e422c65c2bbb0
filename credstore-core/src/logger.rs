//! Log forwarding.
//!
//! Credential stores emit `tracing` events carrying structured `store` and
//! `alias` fields. Secrets are never recorded; keys appear only by
//! fingerprint.
//!
//! Hosts with their own logging pipeline implement [`Logger`] and install it
//! with [`set_logger`]. Anything else can call [`init_tracing`] for formatted
//! output on stderr filtered by `RUST_LOG`.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use credstore_core::logger::{set_logger, LogLevel, Logger};
//!
//! struct StderrLogger;
//!
//! impl Logger for StderrLogger {
//!     fn log(&self, level: LogLevel, message: String) {
//!         eprintln!("[{level:?}] {message}");
//!     }
//! }
//!
//! let _ = set_logger(Arc::new(StderrLogger));
//! ```

use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt as _};
use tracing_subscriber::util::{SubscriberInitExt as _, TryInitError};
use tracing_subscriber::{fmt as fmt_layer, EnvFilter, Layer};

/// Target prefix shared by every crate in this workspace.
const CRATE_TARGET_PREFIX: &str = "credstore";

/// Receives log messages from credential stores.
pub trait Logger: Sync + Send {
    /// Logs a message at the specified level.
    ///
    /// # Arguments
    ///
    /// * `level` - The severity level of the log message.
    /// * `message` - The message followed by its structured fields as
    ///   `key=value` pairs.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Designates very low priority, often extremely detailed messages.
    Trace,
    /// Designates lower priority debugging information.
    Debug,
    /// Designates informational messages that highlight the progress of the application.
    Info,
    /// Designates potentially harmful situations.
    Warn,
    /// Designates error events that might still allow the application to continue running.
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO => Self::Info,
            Level::DEBUG => Self::Debug,
            _ => Self::Trace,
        }
    }
}

/// A `tracing` layer that forwards events to a [`Logger`].
///
/// Debug and trace events from other crates are dropped.
pub struct ForwardingLayer {
    logger: Arc<dyn Logger>,
}

impl ForwardingLayer {
    /// Creates a layer forwarding to `logger`.
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for ForwardingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());

        let is_event_from_credstore = metadata.target().starts_with(CRATE_TARGET_PREFIX);
        let is_debug_or_trace_level = matches!(level, LogLevel::Debug | LogLevel::Trace);
        if is_debug_or_trace_level && !is_event_from_credstore {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.logger.log(level, visitor.finish());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

/// Installs `logger` as the global receiver of credential store events.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn set_logger(logger: Arc<dyn Logger>) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(ForwardingLayer::new(logger))
        .try_init()
}

/// Installs a formatted stderr subscriber filtered by `RUST_LOG`, falling
/// back to `default_directive` (e.g. `"credstore_core=info"`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer::layer().with_writer(std::io::stderr))
        .try_init()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CapturingLogger {
        records: Mutex<Vec<(LogLevel, String)>>,
    }

    impl Logger for CapturingLogger {
        fn log(&self, level: LogLevel, message: String) {
            self.records.lock().unwrap().push((level, message));
        }
    }

    #[test]
    fn test_forwards_message_and_fields() {
        let logger = Arc::new(CapturingLogger::default());
        let subscriber =
            tracing_subscriber::registry().with(ForwardingLayer::new(logger.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(store = "main", "credential store started");
            tracing::warn!(alias = %"db", "flush failed");
        });

        let records = logger.records.lock().unwrap();
        assert_eq!(
            *records,
            vec![
                (LogLevel::Info, "credential store started store=main".to_owned()),
                (LogLevel::Warn, "flush failed alias=db".to_owned()),
            ]
        );
    }

    #[test]
    fn test_drops_foreign_debug_events() {
        let logger = Arc::new(CapturingLogger::default());
        let subscriber =
            tracing_subscriber::registry().with(ForwardingLayer::new(logger.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "hyper::proto", "noise");
            tracing::info!(target: "hyper::proto", "kept");
            tracing::debug!("state transition");
        });

        let records = logger.records.lock().unwrap();
        let messages: Vec<&str> = records.iter().map(|(_, message)| message.as_str()).collect();
        assert_eq!(messages, vec!["kept", "state transition"]);
    }
}
