//! Log output for programs embedding funnel.
//!
//! funnel only emits `tracing` events; nothing is printed until the host
//! installs a subscriber. [`init_tracing`] installs the usual one.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{FunnelError, Result};

/// Filter used when neither an explicit filter nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "funnel=info";

/// Build the filter for [`init_tracing`].
///
/// Precedence:
/// 1. `filter`, when given
/// 2. the `RUST_LOG` environment variable
/// 3. [`DEFAULT_FILTER`]
pub fn env_filter(filter: Option<&str>) -> Result<EnvFilter> {
    match filter {
        Some(directives) => EnvFilter::try_new(directives).map_err(|e| {
            FunnelError::validation(format!(
                "invalid log filter '{}': {}",
                directives, e
            ))
        }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install a global fmt subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(filter: Option<&str>) -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(env_filter(filter)?)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;
    Ok(())
}

/// Run `f` with a thread-local subscriber and return what it logged.
#[cfg(test)]
pub(crate) fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap_or_else(|p| p.into_inner()).clone();
    (result, String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_is_used() {
        let filter = env_filter(Some("funnel=debug")).unwrap();
        assert_eq!(filter.to_string(), "funnel=debug");
    }

    #[test]
    fn bad_filter_is_rejected() {
        assert!(env_filter(Some("funnel=loud")).is_err());
    }

    #[test]
    fn second_init_fails() {
        let _ = init_tracing(Some("funnel=warn"));
        assert!(init_tracing(Some("funnel=warn")).is_err());
    }
}
