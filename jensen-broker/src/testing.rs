//! Helpers for testing the broker.
//!
//! This module is only compiled when `test` is enabled.  Integration tests include it by path, so
//! it must not refer to anything in the crate itself.
#![allow(dead_code)]

/// Initialize tracing with a subscriber and some reasonable defaults suitable for enabling log
/// output in tests.
///
/// This is idempotent; it can be called from multiple tests in multiple threads but will only
/// initialize tracing once.
pub fn init_test_logging() {
    use std::sync::OnceLock;

    const DEFAULT_LOG_FILTER: &str = "jensen_broker=trace,info";
    static INIT_LOGGING: OnceLock<()> = OnceLock::new();

    INIT_LOGGING.get_or_init(|| {
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
            .with_test_writer()
            .try_init()
            .unwrap()
    });
}

/// Decode the text the broker produced for a request, if it produced any.
pub fn decode_output(output: Option<String>) -> Option<serde_json::Value> {
    output.map(|text| {
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("Broker produced invalid JSON ({e}): {text}"))
    })
}
