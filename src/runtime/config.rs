//! Interpreter configuration
//!
//! Stored as pretty-printed JSON. Writes go through a temp file and a
//! rename so a crash never leaves a half-written config behind.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Knobs for [`PipelineInterpreter`](super::PipelineInterpreter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Compile hot rules to closures
    pub compile_rules: bool,

    /// Interpreted uses of a rule before it is compiled
    pub compile_threshold: u64,

    /// Deepest expression the compiler accepts
    pub max_compile_depth: usize,

    /// Message field collecting fault descriptions (None disables it)
    pub processing_error_field: Option<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            compile_rules: true,
            compile_threshold: 1,
            max_compile_depth: 64,
            processing_error_field: Some("processing_error".to_string()),
        }
    }
}

impl InterpreterConfig {
    /// Configuration that never compiles, for differential runs.
    pub fn interpreted_only() -> Self {
        Self {
            compile_rules: false,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data =
            fs::read(path).with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: InterpreterConfig =
            serde_json::from_slice(&data).context("Failed to deserialize config")?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize config")?;
        write_atomic(path, &json)
    }
}

/// Write data atomically to a file
///
/// Creates a temporary file, writes the data, syncs, then renames
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    // Sync parent directory
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_load_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("interpreter.json");

        let config = InterpreterConfig {
            compile_rules: false,
            compile_threshold: 10,
            max_compile_depth: 8,
            processing_error_field: None,
        };
        config.write(&path).unwrap();

        assert_eq!(InterpreterConfig::load(&path).unwrap(), config);
        assert!(!temp.path().join("interpreter.tmp").exists());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial.json");
        fs::write(&path, br#"{"compile_threshold": 3}"#).unwrap();

        let loaded = InterpreterConfig::load(&path).unwrap();
        assert_eq!(loaded.compile_threshold, 3);
        assert!(loaded.compile_rules);
        assert_eq!(
            loaded.processing_error_field.as_deref(),
            Some("processing_error")
        );
    }

    #[test]
    fn test_load_reports_path() {
        let temp = TempDir::new().unwrap();
        let err = InterpreterConfig::load(&temp.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
