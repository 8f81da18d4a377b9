//! Pipeline configuration, read from a TOML file.
//!
//! Every field has a default, so a file only needs the values it changes:
//!
//! ```toml
//! dataset_path = "data/fakenewsnet"
//! representation = "glove"
//! glove_path = "data/glove.6B.100d.txt"
//! embedding_method = "recurrent"
//! number_fake = 100
//! number_real = 100
//! num_unknown = 40
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cooccurrence::CooccurrenceParams;
use crate::decomposition::TuckerOptions;
use crate::embedding::AggregationMethod;
use crate::labels::{LabelOrder, MaskingParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    #[default]
    Cooccurrence,
    Glove,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root holding `Fake/`, `Fake_titles/`, `Real/` and `Real_titles/`.
    pub dataset_path: PathBuf,
    pub glove_path: Option<PathBuf>,
    pub representation: Representation,
    pub embedding_method: AggregationMethod,
    /// Words found in at least `ratio * total_articles` files are ignored.
    pub ratio: f64,
    pub rank: usize,
    pub window: usize,
    pub use_frequency: bool,
    pub number_fake: usize,
    pub number_real: usize,
    pub num_unknown: usize,
    pub proportion_true_fake_label: f64,
    pub label_order: LabelOrder,
    /// Negative keeps the whole vocabulary.
    pub max_words: i64,
    pub in_freq_order: bool,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            dataset_path: PathBuf::from("dataset"),
            glove_path: None,
            representation: Representation::Cooccurrence,
            embedding_method: AggregationMethod::Mean,
            ratio: 0.5,
            rank: 10,
            window: 4,
            use_frequency: true,
            number_fake: 50,
            number_real: 50,
            num_unknown: 20,
            proportion_true_fake_label: 0.5,
            label_order: LabelOrder::Positional,
            max_words: -1,
            in_freq_order: true,
            max_iter: 100,
            tol: 1e-8,
            seed: 12345,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.ratio > 0.) {
            bail!("ratio must be positive, got {}", self.ratio);
        }
        if self.window < 2 {
            bail!("window must be at least 2, got {}", self.window);
        }
        if !(0. ..=1.).contains(&self.proportion_true_fake_label) {
            bail!(
                "proportion_true_fake_label must be within [0, 1], got {}",
                self.proportion_true_fake_label
            );
        }
        if self.rank == 0 {
            bail!("rank must be at least 1");
        }
        if self.number_fake + self.number_real == 0 {
            bail!("number_fake and number_real cannot both be 0");
        }
        if self.representation == Representation::Glove && self.glove_path.is_none() {
            bail!("glove representation requires glove_path");
        }
        Ok(())
    }

    pub fn max_words(&self) -> Option<usize> {
        usize::try_from(self.max_words).ok()
    }

    pub fn masking(&self) -> MaskingParams {
        MaskingParams {
            num_unknown: self.num_unknown,
            proportion_true_fake_label: self.proportion_true_fake_label,
            label_order: self.label_order,
        }
    }

    pub fn cooccurrence(&self) -> CooccurrenceParams {
        CooccurrenceParams {
            window: self.window,
            ratio: self.ratio,
            use_frequency: self.use_frequency,
        }
    }

    pub fn tucker(&self) -> TuckerOptions {
        TuckerOptions {
            max_iter: self.max_iter,
            tol: self.tol,
            ..TuckerOptions::uniform(self.rank)
        }
    }
}
