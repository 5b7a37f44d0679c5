//! Configuration for invokers and logging.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How an [`AsyncInvoker`](crate::invoker::AsyncInvoker) runs tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the tokio runtime's blocking pool.
    #[default]
    Blocking,
    /// On a dedicated, named OS thread per invocation.
    Thread,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" => Ok(Self::Blocking),
            "thread" => Ok(Self::Thread),
            other => Err(format!("unknown dispatch mode '{other}'")),
        }
    }
}

/// Configuration for dispatching invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Where invocation tasks run.
    #[serde(default)]
    pub dispatch: DispatchMode,
    /// Name prefix for threads in [`DispatchMode::Thread`].
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Capacity of the channel carrying escalated cancellation requests.
    #[serde(default = "default_cancel_channel_capacity")]
    pub cancel_channel_capacity: usize,
    /// Whether lifecycle events go to the global event sink.
    #[serde(default = "default_emit_events")]
    pub emit_events: bool,
}

fn default_thread_name_prefix() -> String {
    "asyncinvoke".to_string()
}

fn default_cancel_channel_capacity() -> usize {
    1024
}

fn default_emit_events() -> bool {
    true
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            thread_name_prefix: default_thread_name_prefix(),
            cancel_channel_capacity: default_cancel_channel_capacity(),
            emit_events: default_emit_events(),
        }
    }
}

impl InvokerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the cancellation channel capacity.
    #[must_use]
    pub fn with_cancel_channel_capacity(mut self, capacity: usize) -> Self {
        self.cancel_channel_capacity = capacity;
        self
    }

    /// Enables or disables lifecycle events.
    #[must_use]
    pub fn with_emit_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cancel_channel_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "cancel_channel_capacity",
                "must be greater than zero",
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::invalid_value("thread_name_prefix", "must not be blank"));
        }
        Ok(())
    }

    /// Loads defaults overridden by `ASYNCINVOKE_*` environment variables.
    ///
    /// - `ASYNCINVOKE_DISPATCH`: `blocking` or `thread`
    /// - `ASYNCINVOKE_THREAD_NAME_PREFIX`
    /// - `ASYNCINVOKE_CANCEL_CHANNEL_CAPACITY`
    /// - `ASYNCINVOKE_EMIT_EVENTS`: `true` or `false`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(dispatch) = parse_var(&lookup, "ASYNCINVOKE_DISPATCH")? {
            config.dispatch = dispatch;
        }
        if let Some(prefix) = lookup("ASYNCINVOKE_THREAD_NAME_PREFIX") {
            config.thread_name_prefix = prefix;
        }
        if let Some(capacity) = parse_var(&lookup, "ASYNCINVOKE_CANCEL_CHANNEL_CAPACITY")? {
            config.cancel_channel_capacity = capacity;
        }
        if let Some(emit) = parse_var(&lookup, "ASYNCINVOKE_EMIT_EVENTS")? {
            config.emit_events = emit;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the `tracing` subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info,asyncinvoke=trace`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Include the event target (module path).
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

impl LoggingConfig {
    /// Sets the filter directives.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enables or disables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Loads defaults overridden by `ASYNCINVOKE_LOG` and `ASYNCINVOKE_LOG_JSON`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(filter) = lookup("ASYNCINVOKE_LOG") {
            config.filter = filter;
        }
        if let Some(json) = parse_var(&lookup, "ASYNCINVOKE_LOG_JSON")? {
            config.json = json;
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}
