//! Tracing and logging setup shared by binaries and tests.

/// Subscriber configuration (filters, output format).
pub mod subscriber;

pub use subscriber::{LogFormat, TracingConfig};

/// Initialize process-wide tracing from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init_with(&TracingConfig::from_env());
}
