use log::{debug, error, info, log_enabled, warn, Level, LevelFilter};

/// Initializes the logger with the `env_logger` crate.
///
/// The level comes from `RUST_LOG`; use [`init_logger_with_level`] to set it
/// explicitly.
pub fn init_logger() {
    env_logger::init();
}

/// Initializes `env_logger` at a fixed level, still honouring `RUST_LOG`
/// for per-module overrides. Safe to call more than once.
pub fn init_logger_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Logs a wire frame as upper-case hex at debug level.
pub fn log_frame_hex(label: &str, bytes: &[u8]) {
    if log_enabled!(Level::Debug) {
        debug!("{label} [{}]: {}", bytes.len(), hex::encode_upper(bytes));
    }
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}
