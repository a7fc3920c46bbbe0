//! Fixed-delay connection retry.

use std::thread::sleep;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{BoxError, Result, StoreError};

/// Run `attempt` up to `config.retry_attempts` times, sleeping
/// `config.retry_delay_ms` between failures.
///
/// The configuration is validated before the first attempt, so a missing
/// `host` or `database` never reaches the driver.
///
/// # Errors
///
/// Returns `StoreError::Configuration` for an invalid configuration and
/// `StoreError::Connection` wrapping the last driver error once the budget
/// is spent.
pub fn connect_with_retry<T, E, F>(config: &EngineConfig, mut attempt: F) -> Result<T>
where
    E: Into<BoxError>,
    F: FnMut() -> std::result::Result<T, E>,
{
    config.validate()?;

    let engine = config.engine.dir_name();
    let attempts = config.retry_attempts;
    let mut last_error: Option<BoxError> = None;

    for n in 1..=attempts {
        match attempt() {
            Ok(handle) => {
                info!(engine = engine, host = %config.host, attempt = n, "connected");
                return Ok(handle);
            }
            Err(err) => {
                let err: BoxError = err.into();
                warn!(
                    engine = engine,
                    attempt = n,
                    attempts = attempts,
                    error = %err,
                    "connection attempt failed"
                );
                last_error = Some(err);
                if n < attempts {
                    sleep(config.retry_delay());
                }
            }
        }
    }

    Err(StoreError::Connection {
        engine: engine.to_string(),
        attempts,
        source: last_error
            .unwrap_or_else(|| Box::new(std::io::Error::other("no connection attempt made"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;
    use std::time::Instant;

    #[test]
    fn test_succeeds_after_transient_failures() {
        let config = EngineConfig::new(EngineKind::Redis, "localhost", "0").retry(3, 1);
        let mut calls = 0;
        let value = connect_with_retry(&config, || {
            calls += 1;
            if calls < 3 {
                Err(std::io::Error::other("not yet"))
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhaustion_wraps_last_error() {
        let config = EngineConfig::new(EngineKind::Mysql, "localhost", "app").retry(2, 5);
        let started = Instant::now();
        let mut calls = 0;
        let err = connect_with_retry::<(), _, _>(&config, || {
            calls += 1;
            Err(std::io::Error::other(format!("refused #{}", calls)))
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(started.elapsed().as_millis() >= 5);
        match err {
            StoreError::Connection {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(source.to_string(), "refused #2");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_config_never_attempts() {
        let config = EngineConfig::new(EngineKind::Mysql, "", "app");
        let mut calls = 0;
        let err = connect_with_retry::<(), std::io::Error, _>(&config, || {
            calls += 1;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert_eq!(calls, 0);
    }
}
