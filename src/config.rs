//! # Configuration
//!
//! Settings are read from the environment after `dotenv` has loaded `.env`.
//! Every key is optional and falls back to the defaults of the word2vec
//! reference setup.
//!
//! | Key | Default |
//! |-----|---------|
//! | `LOG_FILE` | `logs/qa_embeddings.log` |
//! | `LOG_LEVEL` | `info` |
//! | `SENTENCE_ENCODER_MODEL` | `all-mini-lm-l12-v2` |
//! | `SENTENCE_ENCODER_DEVICE` | `cuda` when available, else `cpu` |
//! | `VOCABULARY_SIZE` | `50000` |
//! | `BATCH_SIZE` | `128` |
//! | `NUM_SKIPS` | `2` |
//! | `SKIP_WINDOW` | `1` |
//! | `METADATA_PATH` | `models/metadata.tsv` |

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::{LevelFilter, LogConfig};

const DEFAULT_LOG_FILE: &str = "logs/qa_embeddings.log";
const DEFAULT_MODEL: &str = "all-mini-lm-l12-v2";
const DEFAULT_METADATA_PATH: &str = "models/metadata.tsv";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Which sentence encoder to fetch and where to run it.
///
/// # Fields
///
/// * `model` - Name of the pretrained model, see `embedding::model_type_from_name`.
/// * `device` - `Some("cpu")`, `Some("cuda")` or `None` for auto-detection.
pub struct EncoderConfig {
    pub model: String,
    pub device: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { model: DEFAULT_MODEL.to_string(), device: None }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Parameters of the skip-gram dataset.
///
/// # Fields
///
/// * `vocabulary_size` - Maximum vocabulary size, UNK included.
/// * `batch_size` - Pairs per batch.
/// * `num_skips` - Pairs drawn per window.
/// * `skip_window` - Context radius on each side of the target.
pub struct SkipGramConfig {
    pub vocabulary_size: usize,
    pub batch_size: usize,
    pub num_skips: usize,
    pub skip_window: usize,
}

impl Default for SkipGramConfig {
    fn default() -> Self {
        Self {
            vocabulary_size: 50_000,
            batch_size: 128,
            num_skips: 2,
            skip_window: 1,
        }
    }
}

impl SkipGramConfig {
    /// Check the parameter contract of `generate_batch` up front.
    pub fn validate(&self) -> Result<()> {
        if self.vocabulary_size == 0 {
            return Err(Error::InvalidArgument("VOCABULARY_SIZE must be at least 1".into()));
        }
        if self.num_skips == 0 || self.batch_size % self.num_skips != 0 {
            return Err(Error::InvalidArgument(format!(
                "BATCH_SIZE ({}) must be a multiple of NUM_SKIPS ({})",
                self.batch_size, self.num_skips
            )));
        }
        if self.num_skips > 2 * self.skip_window {
            return Err(Error::InvalidArgument(format!(
                "NUM_SKIPS ({}) must not exceed 2 * SKIP_WINDOW ({})",
                self.num_skips, 2 * self.skip_window
            )));
        }
        Ok(())
    }

    /// Size of the short preview batch printed before a full epoch.
    ///
    /// Four target windows, so it stays a multiple of `num_skips` for any
    /// configuration `validate` accepts.
    pub fn sample_batch_size(&self) -> usize {
        self.num_skips * 4
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log: LogConfig,
    pub encoder: EncoderConfig,
    pub skip_gram: SkipGramConfig,
    pub metadata_path: String,
}

impl AppConfig {
    /// Build the configuration from the process environment.
    ///
    /// # Returns
    ///
    /// * `Ok(AppConfig)` - The validated configuration.
    /// * `Err(Error::InvalidArgument)` - A variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_file = lookup("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        let log_level = match lookup("LOG_LEVEL") {
            Some(level) => LevelFilter::from_str(&level)
                .map_err(|_| Error::InvalidArgument(format!("unknown LOG_LEVEL '{}'", level)))?,
            None => LevelFilter::Info,
        };

        let encoder = EncoderConfig {
            model: lookup("SENTENCE_ENCODER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            device: lookup("SENTENCE_ENCODER_DEVICE"),
        };

        let defaults = SkipGramConfig::default();
        let skip_gram = SkipGramConfig {
            vocabulary_size: parse_or(&lookup, "VOCABULARY_SIZE", defaults.vocabulary_size)?,
            batch_size: parse_or(&lookup, "BATCH_SIZE", defaults.batch_size)?,
            num_skips: parse_or(&lookup, "NUM_SKIPS", defaults.num_skips)?,
            skip_window: parse_or(&lookup, "SKIP_WINDOW", defaults.skip_window)?,
        };
        skip_gram.validate()?;

        Ok(Self {
            log: LogConfig::new(log_file, log_level),
            encoder,
            skip_gram,
            metadata_path: lookup("METADATA_PATH").unwrap_or_else(|| DEFAULT_METADATA_PATH.to_string()),
        })
    }
}

fn parse_or<F>(lookup: &F, key: &str, default: usize) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            Error::InvalidArgument(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.skip_gram, SkipGramConfig::default());
        assert_eq!(config.encoder, EncoderConfig::default());
        assert_eq!(config.log.log_level, LevelFilter::Info);
        assert_eq!(config.metadata_path, DEFAULT_METADATA_PATH);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("BATCH_SIZE", "8"),
            ("NUM_SKIPS", "4"),
            ("SKIP_WINDOW", "2"),
            ("LOG_LEVEL", "debug"),
            ("SENTENCE_ENCODER_DEVICE", "cpu"),
        ]))
        .unwrap();
        assert_eq!(config.skip_gram.batch_size, 8);
        assert_eq!(config.skip_gram.num_skips, 4);
        assert_eq!(config.skip_gram.skip_window, 2);
        assert_eq!(config.log.log_level, LevelFilter::Debug);
        assert_eq!(config.encoder.device.as_deref(), Some("cpu"));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn batch_size_must_divide_by_num_skips() {
        let err = AppConfig::from_lookup(lookup_from(&[("BATCH_SIZE", "9")])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn num_skips_bounded_by_window() {
        let config = SkipGramConfig { num_skips: 4, skip_window: 1, ..SkipGramConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sample_batch_fits_any_accepted_config() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("BATCH_SIZE", "129"),
            ("NUM_SKIPS", "3"),
            ("SKIP_WINDOW", "2"),
        ]))
        .unwrap();
        let params = config.skip_gram;
        let data: Vec<usize> = (0..50).collect();
        let mut rng = fastrand::Rng::with_seed(3);

        let sample = crate::word2vec::generate_batch(
            params.sample_batch_size(),
            params.num_skips,
            params.skip_window,
            &data,
            &mut rng,
        )
        .unwrap();
        assert_eq!(sample.len(), 12);
        assert_eq!(sample.len() % params.num_skips, 0);
    }
}
