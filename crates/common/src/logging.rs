//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Level names accepted by `setup_logging` and configuration files
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// True if `level` names one of the five tracing levels (case-insensitive)
pub fn is_valid_level(level: &str) -> bool {
    LOG_LEVELS.iter().any(|l| l.eq_ignore_ascii_case(level))
}

/// Setup tracing subscriber for a binary
///
/// `RUST_LOG` takes precedence over `default_level`. Library code only
/// emits events; it never calls this.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| crate::Error::Logging(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_level() {
        assert!(is_valid_level("info"));
        assert!(is_valid_level("DEBUG"));
        assert!(!is_valid_level("verbose"));
        assert!(!is_valid_level(""));
    }
}
