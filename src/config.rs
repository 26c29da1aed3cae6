//! Immutable pipeline configuration.
//!
//! A [`PipelineConfig`] is built once by the caller and handed to
//! [`crate::pipeline::Pipeline::new`]. It can be loaded from a YAML file; any
//! key left out falls back to its default.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const DEFAULT_SAMPLE_SIZE: usize = 1000;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_PREVIEW_ROWS: usize = 1000;
pub const DEFAULT_ENCODING_PROBE_BYTES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root under which `raw/`, `clean/` and `preview/` live.
    pub storage_root: PathBuf,
    /// Cap on non-null values inspected per column during type detection.
    pub sample_size: usize,
    pub sample_seed: u64,
    pub preview_rows: usize,
    /// Bytes inspected when sniffing the encoding of delimited text.
    pub encoding_probe_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: DEFAULT_SAMPLE_SEED,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            encoding_probe_bytes: DEFAULT_ENCODING_PROBE_BYTES,
        }
    }
}

impl PipelineConfig {
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            PipelineError::Config(format!("Opening config file {path:?}: {err}"))
        })?;
        let config: Self = serde_yaml::from_reader(BufReader::new(file)).map_err(|err| {
            PipelineError::Config(format!("Parsing config file {path:?}: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(PipelineError::Config(
                "sample_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.storage_root.join("raw")
    }

    pub fn clean_dir(&self) -> PathBuf {
        self.storage_root.join("clean")
    }

    pub fn preview_dir(&self) -> PathBuf {
        self.storage_root.join("preview")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_fills_missing_keys_with_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "storage_root: /tmp/refinery").unwrap();
        writeln!(file, "preview_rows: 50").unwrap();

        let config = PipelineConfig::load(file.path()).expect("load config");
        assert_eq!(config.storage_root, PathBuf::from("/tmp/refinery"));
        assert_eq!(config.preview_rows, 50);
        assert_eq!(config.sample_size, DEFAULT_SAMPLE_SIZE);
        assert_eq!(config.sample_seed, DEFAULT_SAMPLE_SEED);
    }

    #[test]
    fn load_rejects_zero_sample_size() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "sample_size: 0").unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert_eq!(err.error_type(), "ConfigError");
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let err = PipelineConfig::load(Path::new("/definitely/not/here.yml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn storage_directories_hang_off_the_root() {
        let config = PipelineConfig::default().with_storage_root("/data");
        assert_eq!(config.raw_dir(), PathBuf::from("/data/raw"));
        assert_eq!(config.clean_dir(), PathBuf::from("/data/clean"));
        assert_eq!(config.preview_dir(), PathBuf::from("/data/preview"));
    }
}
