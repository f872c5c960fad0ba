pub mod config;
pub mod soak;

use keel_dispatch::DispatcherConfig;
use std::path::Path;

/// Load a config file, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DispatcherConfig> {
    match path {
        Some(path) => DispatcherConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e)),
        None => Ok(DispatcherConfig::default()),
    }
}
