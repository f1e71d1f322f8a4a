//! Logging setup utilities for the tandem relay.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events are always enabled at the default level.
const RELAY_CRATES: [&str; 2] = ["tandem_server", "tandem_shared"];

/// Initialize the tracing subscriber with the specified default log level.
///
/// The relay crates and the binary itself log at `default_log_level`;
/// everything else stays at `warn`. The filter can be overridden entirely with
/// the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "tandem-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use tandem_shared::logger::setup_logger;
///
/// setup_logger("tandem-server", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    for target in RELAY_CRATES
        .iter()
        .map(|name| name.to_string())
        .chain(std::iter::once(binary_name.replace('-', "_")))
    {
        directives.push(format!("{}={}", target, default_log_level));
    }
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_relay_crates_and_binary() {
        // Test: the default filter enables the relay crates and the binary at the given level
        // given:
        let binary = "tandem-server";

        // when:
        let filter = default_filter(binary, "debug");

        // then:
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("tandem_server=debug"));
        assert!(filter.contains("tandem_shared=debug"));
        assert!(!filter.contains("tandem-server"));
    }
}
