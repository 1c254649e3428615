//! Logging setup for processes embedding the engine.
//!
//! The engine logs through `tracing`: spans per plan, apply and provider
//! call, with addresses and counts as fields. Values are never logged. These
//! helpers install a subscriber that writes to **stderr**, leaving stdout to
//! the host process (an orchestration server speaking a handshake on stdout,
//! for example).
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives, e.g. `info` or `hemmer_stacks=debug`
//!
//! ```bash
//! # Engine phases and provider calls
//! RUST_LOG=hemmer_stacks=debug ./stacks-server
//!
//! # Only the apply engine
//! RUST_LOG=warn,hemmer_stacks::stacks::apply=debug ./stacks-server
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn install(default_level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
}

/// Install the stderr subscriber at `info`, or whatever `RUST_LOG` says.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different level when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
///
/// # Example
///
/// ```ignore
/// hemmer_stacks::init_logging_with_default("debug");
/// tracing::debug!("engine starting");
/// ```
pub fn init_logging_with_default(default_level: &str) {
    if let Err(err) = install(default_level) {
        panic!("failed to install logging subscriber: {}", err);
    }
}

/// Install the subscriber unless one is already set. Returns whether this
/// call installed it; useful in tests, where many cases share one process.
pub fn try_init_logging() -> bool {
    install("info").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("hemmer_stacks=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_stacks::stacks::apply=trace").is_ok());
    }

    #[test]
    fn test_second_install_reports_failure() {
        // Whichever test installs first wins; later attempts must not panic.
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
