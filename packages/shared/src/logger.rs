//! Logging setup utilities for the Kaigi signaling server.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose spans and events are enabled at the default level.
const APP_TARGETS: [&str; 3] = ["kaigi_server", "kaigi_shared", "tower_http"];

/// Build the default filter directive for the given binary and level.
///
/// The binary name is normalised the same way cargo normalises crate names,
/// so `kaigi-server` becomes the `kaigi_server` target.
pub fn default_directive(binary_name: &str, default_log_level: &str) -> String {
    let binary_target = binary_name.replace('-', "_");
    let mut directives: Vec<String> = APP_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, default_log_level))
        .collect();
    if !APP_TARGETS.contains(&binary_target.as_str()) {
        directives.push(format!("{}={}", binary_target, default_log_level));
    }
    directives.join(",")
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// The log level can be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "kaigi-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use kaigi_shared::logger::setup_logger;
///
/// setup_logger("kaigi-server", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_includes_binary_target() {
        // テスト項目: バイナリ名がターゲットとしてフィルタに含まれる
        // given (前提条件):
        let binary_name = "kaigi-loadgen";

        // when (操作):
        let directive = default_directive(binary_name, "debug");

        // then (期待する結果):
        assert!(directive.contains("kaigi_server=debug"));
        assert!(directive.contains("tower_http=debug"));
        assert!(directive.contains("kaigi_loadgen=debug"));
    }

    #[test]
    fn test_default_directive_does_not_duplicate_server_target() {
        // テスト項目: サーバーバイナリ名が重複してフィルタに含まれない
        // given (前提条件):
        let binary_name = "kaigi-server";

        // when (操作):
        let directive = default_directive(binary_name, "info");

        // then (期待する結果):
        assert_eq!(directive.matches("kaigi_server=info").count(), 1);
    }
}
