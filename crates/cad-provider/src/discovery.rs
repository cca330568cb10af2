//! Agent CLI binary discovery: PATH lookup, then fixed fallback locations.

use std::path::PathBuf;

use cad_core::error::DriverError;
use tracing::debug;

use crate::provider::Provider;

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(dirs) = directories::BaseDirs::new()
    {
        return dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}

/// Locate the provider's CLI binary.
///
/// Fails with [`DriverError::BinaryMissing`] when neither PATH nor the
/// fallback paths have it; the orchestrator is never constructed in that
/// case.
pub(crate) fn find_binary(provider: &Provider) -> Result<PathBuf, DriverError> {
    if let Ok(path) = which::which(provider.binary_name()) {
        debug!(binary = %path.display(), "resolved agent CLI from PATH");
        return Ok(path);
    }
    for candidate in provider.fallback_paths() {
        let expanded = expand_home(candidate);
        if expanded.is_file() {
            debug!(binary = %expanded.display(), "resolved agent CLI from fallback path");
            return Ok(expanded);
        }
    }
    Err(DriverError::BinaryMissing {
        binary: provider.binary_name().to_string(),
    })
}
