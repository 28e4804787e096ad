//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide tracing with the format named by
/// `CADENCE_LOG_FORMAT` (JSON when unset).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Initialize process-wide tracing with an explicit format.
pub fn init_with(format: tracing::LogFormat) {
    tracing::init(format);
}

/// Subscriber configuration (filters, formatters).
pub mod tracing;

pub use tracing::LogFormat;
