//! Log setup.
//!
//! `RUST_LOG` wins over the configured level when it is set.

use tracing_subscriber::EnvFilter;

/// Build the filter used by [`init`].
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global fmt subscriber.
///
/// Returns false when a global subscriber was already installed, in which
/// case nothing changes.
pub fn init(level: &str) -> bool {
    match tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Tracing subscriber already installed: {}", e);
            false
        }
    }
}
