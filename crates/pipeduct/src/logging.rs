use clap::ValueEnum;
use tracing::Level;

/// Stderr log rendering.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Compact single-line text.
    Text,
    /// One JSON object per event.
    Json,
}

/// Stderr verbosity cap. `Off` keeps the subscriber uninstalled, which
/// matters for `--format raw` pipelines that must own stderr too.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Install the process-wide subscriber.
///
/// Later calls (tests, embedders that already installed one) lose
/// quietly and keep the first subscriber.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let Some(level) = level.as_level() else {
        return;
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Text => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_maps_to_no_level() {
        assert!(LogLevel::Off.as_level().is_none());
        assert_eq!(LogLevel::Error.as_level(), Some(Level::ERROR));
        assert_eq!(LogLevel::Trace.as_level(), Some(Level::TRACE));
    }
}
