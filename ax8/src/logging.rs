use crate::error::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Pick the filter for the console output. `RUST_LOG` always wins, the
/// debug flag only changes the fallback level.
///
/// * `debug`: raise the default verbosity from `info` to `debug`.
pub fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Install the global tracing subscriber for a binary. Diagnostics for
/// each configuration step and the timing of downloads go to the console.
///
/// * `debug`: whether the run was started with the debug flag.
pub fn init(debug: bool) -> Result<()> {
    let console_layer = fmt::layer()
        .with_ansi(!cfg!(windows))
        .with_target(false);

    let collector = tracing_subscriber::registry()
        .with(console_layer)
        .with(default_filter(debug));
    tracing::subscriber::set_global_default(collector).map_err(|e| Error::Logging(e.to_string()))?;

    if let Ok(var) = std::env::var("RUST_LOG") {
        tracing::debug!("Logging initiated to console with RUST_LOG=\"{var}\".");
    } else {
        tracing::debug!("Logging initiated to console.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_debug_flag_sets_fallback_level() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(default_filter(true).to_string(), "debug");
        assert_eq!(default_filter(false).to_string(), "info");
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_debug_flag() {
        std::env::set_var("RUST_LOG", "warn");
        let filter = default_filter(true);
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "warn");
    }
}
