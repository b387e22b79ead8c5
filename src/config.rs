// ⚙️ Pipeline Configuration
// Optional JSON file; every field has a default so `{}` is a valid config.

use crate::flatten::{Flattener, DEFAULT_TEXT_WIDTH};
use crate::rules::MarketingRules;
use crate::tracking::{default_parameters, TrackingExtractor, TrackingParameter};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Field delimiter of the property CSV files (default: ',')
    pub csv_delimiter: char,

    /// Characters kept in text columns of the marketing view (default: 100)
    pub text_width: usize,

    pub marketing_rules: MarketingRules,

    /// Query keys pulled out of landing-page URLs
    pub tracking_parameters: Vec<TrackingParameter>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            csv_delimiter: ',',
            text_width: DEFAULT_TEXT_WIDTH,
            marketing_rules: MarketingRules::default(),
            tracking_parameters: default_parameters(),
        }
    }
}

impl PipelineConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.delimiter_byte()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// CSV readers want a single byte
    pub fn delimiter_byte(&self) -> Result<u8> {
        if !self.csv_delimiter.is_ascii() {
            bail!("csv_delimiter must be an ASCII character, got {:?}", self.csv_delimiter);
        }
        Ok(self.csv_delimiter as u8)
    }

    pub fn flattener(&self) -> Flattener {
        Flattener {
            rules: self.marketing_rules.clone(),
            text_width: self.text_width,
            ..Flattener::new()
        }
    }

    pub fn tracking_extractor(&self) -> TrackingExtractor {
        TrackingExtractor::with_parameters(self.tracking_parameters.clone())
    }
}
