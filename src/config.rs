//! Configuration file support.
//!
//! Values are read from the first file found in this order:
//! an explicit path, `<dir>/.imgcull.toml`, `<config dir>/imgcull/config.toml`.
//! Missing files fall back to defaults; command-line flags override both.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::similarity::{DEFAULT_THRESHOLD, MatchGates, MatchParams, ScoreWeights};

pub const LOCAL_CONFIG_FILE: &str = ".imgcull.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum perceptual-hash distance for two images to match.
    pub threshold: u32,
    /// Lowercase file extensions treated as images.
    pub extensions: Vec<String>,
    /// Folder (relative to the scanned directory) that receives discards.
    pub discarded_dir: String,
    pub recursive: bool,
    pub history_file: String,
    pub weights: ScoreWeights,
    pub gates: MatchGates,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            extensions: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()],
            discarded_dir: "discarded".to_string(),
            recursive: false,
            history_file: ".history.jsonl".to_string(),
            weights: ScoreWeights::default(),
            gates: MatchGates::default(),
        }
    }
}

impl Config {
    /// Load configuration for a scan of `dir`.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        let config = match Self::locate(explicit, dir) {
            Some(path) => {
                log::debug!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>, dir: &Path) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = dir.join(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("imgcull").join("config.toml"))
            .filter(|p| p.is_file())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        let all = [w.perceptual, w.difference, w.wavelet, w.average, w.hash, w.color];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::Invalid {
                message: "weights must be finite and non-negative".to_string(),
            });
        }
        if w.perceptual + w.difference + w.wavelet + w.average <= 0.0 || w.hash + w.color <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "weights must not all be zero".to_string(),
            });
        }

        let g = &self.gates;
        let gates = [
            g.aspect_tolerance,
            g.difference_multiplier,
            g.min_color_score,
            g.strong_color_score,
        ];
        if gates.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::Invalid {
                message: "gates must be finite and non-negative".to_string(),
            });
        }

        if self.extensions.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one image extension is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn match_params(&self) -> MatchParams {
        MatchParams {
            threshold: self.threshold,
            weights: self.weights,
            gates: self.gates,
        }
    }

    pub fn discarded_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.discarded_dir)
    }

    pub fn history_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.history_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.threshold, 10);
        assert_eq!(config.discarded_dir, "discarded");
        assert_eq!(config.match_params(), MatchParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            threshold = 6
            recursive = true

            [weights]
            perceptual = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.threshold, 6);
        assert!(config.recursive);
        assert_eq!(config.weights.perceptual, 0.7);
        assert_eq!(config.weights.difference, 0.3);
        assert_eq!(config.gates, MatchGates::DEFAULT);
        assert_eq!(config.extensions.len(), 3);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = Config::default();
        config.weights.color = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_weights_rejected() {
        let mut config = Config::default();
        config.weights.hash = 0.0;
        config.weights.color = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_load_prefers_local_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(LOCAL_CONFIG_FILE), "threshold = 3\n").unwrap();

        let config = Config::load(None, temp_dir.path()).unwrap();
        assert_eq!(config.threshold, 3);
    }

    #[test]
    fn test_load_explicit_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "threshold = \"many\"\n").unwrap();

        let err = Config::load(Some(&path), temp_dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
