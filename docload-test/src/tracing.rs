//! Logging for tests.
//!
//! Virtual users run on several worker threads, so every line carries the name of the thread
//! that emitted it. Timestamps are left out to keep captured output short.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Directives used when `RUST_LOG` is unset or empty.
pub const DEFAULT_DIRECTIVES: &str = "docload=debug,docload_test=debug,hyper=warn,reqwest=warn";

/// Builds the test log filter from the given `RUST_LOG` value.
///
/// Targets not matched by any directive only log errors. Directives that fail to parse are
/// skipped instead of failing the test.
pub fn filter(directives: Option<&str>) -> EnvFilter {
    let directives = directives
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(DEFAULT_DIRECTIVES);

    EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .parse_lossy(directives)
}

/// Initialize the logger for testing.
///
/// Output goes to the writer captured by the Rust test runner. Set `RUST_LOG` to override
/// [`DEFAULT_DIRECTIVES`]. Calling this more than once is harmless.
///
/// # Example
///
/// ```
/// docload_test::tracing::init();
/// ```
pub fn init() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::fmt()
        .with_env_filter(filter(directives.as_deref()))
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .compact()
        .try_init()
        .ok();
}
