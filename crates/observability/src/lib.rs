//! Process-wide tracing setup shared by the binaries.

/// Subscriber configuration (filter, output format).
pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize process-wide logging from `RUST_LOG` and `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init(LogFormat::from_env());
}
