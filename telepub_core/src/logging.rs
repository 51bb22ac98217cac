/**
 * Log sink capability.
 *
 * The publisher never writes to a global logger slot of its own. Instead a
 * `LogSink` closure is handed in through `Options::logger` and carried by a
 * cloneable `Logger` into every component that logs (orchestrator,
 * completion handler, driver).
 *
 * When no sink is configured the `Logger` forwards to the `log` facade
 * under the `telepub` target, so applications that already install a `log`
 * backend (e.g. `env_logger`) get publisher output for free.
 */
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

/// Severity of a publisher log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Info,
    Debug,
    Error,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// LogSink / Logger
// ---------------------------------------------------------------------------

/// A caller-supplied destination for publisher log lines.
pub type LogSink = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Log target used when forwarding to the `log` facade.
pub const LOG_TARGET: &str = "telepub";

/**
 * Cheap, cloneable handle to the configured sink.
 */
#[derive(Clone, Default)]
pub struct Logger {
    sink: Option<LogSink>,
}

impl Logger {
    pub fn new(sink: Option<LogSink>) -> Self {
        Self { sink }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match &self.sink {
            Some(sink) => sink(level, message),
            None => log::log!(target: LOG_TARGET, level.as_log_level(), "{message}"),
        }
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}

/**
 * A sink that writes `[level] message` lines to stderr.
 *
 * Useful for tools that want console output without installing a `log`
 * backend.
 */
pub fn stderr_sink() -> LogSink {
    Arc::new(|level: LogLevel, message: &str| eprintln!("[{level}] {message}"))
}
