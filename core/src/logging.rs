use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber. `RUST_LOG` wins over `level`.
///
/// Calling this again after a subscriber is set is a no-op.
pub fn init(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => crate_filter(level)?,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    Ok(())
}

/// `level` for the pinsnap crates, nothing for dependencies.
pub fn crate_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("pinsnap_core={level},pinsnap_backends={level}"))
        .map_err(|e| Error::Config(format!("Invalid log level {:?}: {}", level, e)))
}
