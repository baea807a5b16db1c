//! Run configuration.
//!
//! A batch run is described by a JSON file; every field is optional and
//! falls back to the defaults below. Example:
//!
//! ```json
//! {
//!   "images_dir": "images/paintings",
//!   "output_dir": "output",
//!   "model_dir": "models",
//!   "top_k": 15,
//!   "scorer": { "kind": "command", "program": "./bing_scorer", "box_format": "corners" }
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::export::OutputFormat;
use crate::proposals::command::CommandSettings;
use crate::proposals::contours::ContourSettings;
use crate::proposals::{CommandGenerator, ContourGenerator, ProposalGenerator, ScorerParams};

/// Historical number of crops kept per image.
pub const DEFAULT_TOP_K: i64 = 15;

pub const DEFAULT_LABEL_MARKER: &str = "_WRONG";

/// Which proposal generator to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScorerConfig {
    Contours(ContourSettings),
    Command(CommandSettings),
}

impl Default for ScorerConfig {
    fn default() -> Self {
        ScorerConfig::Contours(ContourSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub images_dir: PathBuf,
    /// Base directory for crops and the metadata file.
    pub output_dir: PathBuf,
    pub crops_subdir: String,
    pub metadata_file: String,
    pub model_dir: PathBuf,
    /// Accepted image extensions, compared case-insensitively, without the dot.
    pub extensions: Vec<String>,
    pub top_k: i64,
    /// Filename substring that flags an image. `None` disables labelling.
    pub label_marker: Option<String>,
    pub output_format: OutputFormat,
    pub scorer: ScorerConfig,
    pub params: ScorerParams,
    pub parallel: bool,
    /// Stop the batch at the first image the scorer reports as unready.
    pub abort_on_unready: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images/paintings"),
            output_dir: PathBuf::from("output"),
            crops_subdir: "bing_crops".to_string(),
            metadata_file: "bing_crops.csv".to_string(),
            model_dir: PathBuf::from("models"),
            extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
            top_k: DEFAULT_TOP_K,
            label_marker: Some(DEFAULT_LABEL_MARKER.to_string()),
            output_format: OutputFormat::default(),
            scorer: ScorerConfig::default(),
            params: ScorerParams::default(),
            parallel: false,
            abort_on_unready: false,
        }
    }
}

impl BatchConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: BatchConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.extensions.iter().all(|e| e.trim_start_matches('.').is_empty()) {
            bail!("At least one image extension must be configured");
        }
        if self.crops_subdir.is_empty() {
            bail!("crops_subdir must not be empty");
        }
        if self.metadata_file.is_empty() {
            bail!("metadata_file must not be empty");
        }
        if let OutputFormat::Jpeg { quality } = self.output_format {
            if quality == 0 || quality > 100 {
                bail!("JPEG quality must be within 1..=100, got {}", quality);
            }
        }
        match &self.scorer {
            ScorerConfig::Contours(settings) => {
                if settings.sigma <= 0.0 {
                    bail!("Contour scorer sigma must be positive");
                }
                if settings.max_proposals == 0 {
                    bail!("Contour scorer max_proposals must be at least 1");
                }
                if settings.low_threshold > settings.high_threshold {
                    bail!(
                        "Contour scorer low_threshold ({}) exceeds high_threshold ({})",
                        settings.low_threshold,
                        settings.high_threshold
                    );
                }
            }
            ScorerConfig::Command(settings) => {
                if settings.program.trim().is_empty() {
                    bail!("Command scorer needs a program");
                }
                if settings.timeout_secs == Some(0) {
                    bail!("Command scorer timeout must be at least one second");
                }
            }
        }
        Ok(())
    }

    pub fn crops_dir(&self) -> PathBuf {
        self.output_dir.join(&self.crops_subdir)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata_file)
    }

    /// Normalised extension list: lowercase, no leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// Build the run's single scorer instance.
    pub fn build_generator(&self) -> Box<dyn ProposalGenerator> {
        match &self.scorer {
            ScorerConfig::Contours(settings) => Box::new(ContourGenerator::new(settings.clone())),
            ScorerConfig::Command(settings) => Box::new(CommandGenerator::new(
                settings.clone(),
                self.model_dir.clone(),
                self.params,
            )),
        }
    }
}
