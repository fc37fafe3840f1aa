use std::fs;
use std::path::Path;

use interposer_core::InterposerConfig;

use crate::ToolError;

/// Loads and validates an [`InterposerConfig`] from a JSON file.
///
/// Missing fields fall back to their defaults.
///
/// # Errors
///
/// Returns [`ToolError::Io`] when the file cannot be read,
/// [`ToolError::ConfigParse`] when it is not valid JSON for the config shape,
/// and [`ToolError::Config`] when the values are inconsistent.
pub fn load_config(path: &Path) -> Result<InterposerConfig, ToolError> {
    let text = fs::read_to_string(path).map_err(|source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: InterposerConfig =
        serde_json::from_str(&text).map_err(|source| ToolError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    log::debug!("loaded configuration from {}", path.display());
    Ok(config)
}
