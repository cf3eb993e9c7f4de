//! Tracing setup shared by the binary and the tests.

use tracing::Level;

use crate::config::LogSettings;

/// Maps a configured level name to a tracing level. Unknown names mean INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Installs the global fmt subscriber. Returns false when one was already
/// installed, which is expected under `cargo test`.
pub fn init(settings: &LogSettings) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(parse_level(&settings.level))
        .with_target(false)
        .try_init()
        .is_ok()
}
