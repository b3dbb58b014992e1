//! Diagnostic logging setup.
//!
//! Diagnostics go to stderr through `tracing`; stdout is reserved for command results.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// Builds the filter: an explicit `--log-level` wins, then `RUST_LOG`, then `info`.
pub fn build_filter(log_level: Option<&str>) -> EnvFilter {
    if let Some(level) = log_level {
        if let Ok(filter) = EnvFilter::try_new(level) {
            return filter;
        }
        eprintln!("Invalid log level '{level}', falling back to {DEFAULT_LEVEL}");
        return EnvFilter::new(DEFAULT_LEVEL);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Installs the global subscriber. Calling it twice is harmless.
pub fn init_logging(log_level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(log_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` under a thread-local subscriber and returns its result with the warnings logged.
    pub(crate) fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        let value = tracing::subscriber::with_default(subscriber, f);
        let output = String::from_utf8_lossy(&buffer.0.lock().unwrap()).to_string();
        (value, output)
    }

    #[test]
    fn test_capture_warnings_skips_info() {
        let ((), output) = capture_warnings(|| {
            tracing::info!("routine");
            tracing::warn!("something odd");
        });
        assert!(output.contains("something odd"));
        assert!(!output.contains("routine"));
    }

    #[test]
    fn test_explicit_level_wins() {
        assert_eq!(build_filter(Some("debug")).to_string(), "debug");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging(Some("warn"));
        init_logging(Some("warn"));
    }
}
