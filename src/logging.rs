//! Diagnostic logging.
//!
//! Logs go to stderr so stdout stays free for the JSON results the CLI
//! prints. `RUST_LOG` overrides the configured level.

use tracing_subscriber::{fmt, EnvFilter};

/// Log level for the subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// 0 = Info, 1 = Debug, 2+ = Trace
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub with_timestamps: bool,
    /// Include the module path of each event.
    pub with_target: bool,
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamps: true,
            with_target: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Maps the CLI flags to a configuration. `quiet` wins over `verbose`.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            LogLevel::Warn
        } else {
            LogLevel::from(verbose)
        };
        Self::default().with_level(level)
    }

    /// Filter directive used when `RUST_LOG` is unset. Dependencies stay at
    /// warn unless tracing everything.
    pub fn directive(&self) -> String {
        match self.level {
            LogLevel::Trace | LogLevel::Off => self.level.as_str().to_string(),
            level => format!("warn,rebrand={}", level.as_str()),
        }
    }
}

/// Installs the global subscriber.
///
/// Returns false when a subscriber was already installed, which happens when
/// tests initialize logging more than once.
pub fn init_logging(config: LoggingConfig) -> bool {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.directive())
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.with_target)
        .with_ansi(config.with_ansi);

    let installed = if config.with_timestamps {
        subscriber.try_init()
    } else {
        subscriber.without_time().try_init()
    };
    installed.is_ok()
}
