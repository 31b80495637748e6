//! Tracing setup shared by all three binaries.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub default_level: String,
    pub ansi: bool,
    pub thread_ids: bool,
}

impl LogConfig {
    /// JSON output, no ANSI, quiet dependency noise; for long-running
    /// server/worker processes.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            default_level: "info,tokio=warn,h2=warn".to_string(),
            ansi: false,
            thread_ids: true,
        }
    }

    /// Readable, colored output for local runs.
    pub fn development() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_level: "debug".to_string(),
            ansi: true,
            thread_ids: false,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }

    /// Installs the global subscriber. Safe to call once per process; a
    /// second call is a no-op error that callers should ignore.
    pub fn init(&self) {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_ansi(self.ansi)
            .with_thread_ids(self.thread_ids)
            .with_span_events(FmtSpan::CLOSE);

        let result = match self.format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        };
        if let Err(e) = result {
            tracing::debug!("tracing subscriber already initialized: {e}");
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::development()
    }
}
