//! # Sentence Embeddings
//!
//! Lazily loads a pretrained sentence encoder and maps batches of text to
//! fixed-size vectors.
//!
//! The encoder is fetched the first time `EmbeddingProvider::embedder` or
//! `EmbeddingProvider::embedding_size` is called and reused afterwards.
//! Fetching may download model files from the HuggingFace hub and can take a
//! while; nothing is fetched when the provider is constructed.
//!
//! This module uses the Rust-BERT crate to load the model.
//!
//! ## Examples
//!
//! ```no_run
//! use qa_embeddings::config::EncoderConfig;
//! use qa_embeddings::embedding::EmbeddingProvider;
//!
//! let provider = EmbeddingProvider::from_config(&EncoderConfig::default()).unwrap();
//! let embedder = provider.embedder().unwrap();
//! let vectors = embedder.embed(&["How long does the battery last?"]).unwrap();
//! assert_eq!(vectors.ncols(), provider.embedding_size().unwrap());
//! ```
//!
//! ## References
//!
//! - [Rust-BERT](https://github.com/guillaume-be/rust-bert)
//! - [all-MiniLM-L12-v2](https://huggingface.co/sentence-transformers/all-MiniLM-L12-v2)

use std::sync::{Arc, Mutex};

use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use rust_bert::pipelines::sentence_embeddings::{
    SentenceEmbeddingsBuilder, SentenceEmbeddingsModel, SentenceEmbeddingsModelType,
};
use tch::Device;

use crate::config::EncoderConfig;
use crate::error::{Error, Result};

const DIMENSION_SAMPLE: &str = "dimension sample";

/// A pretrained model mapping sentences to fixed-size vectors.
pub trait SentenceEncoder {
    /// Encode every sentence of `batch` into one vector of `output_dim` values.
    fn encode(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Length of the vectors returned by `encode`.
    fn output_dim(&self) -> usize;
}

/// Resolve a model name such as `all-mini-lm-l12-v2` to a Rust-BERT model type.
///
/// # Returns
///
/// * `Ok(SentenceEmbeddingsModelType)` - The matching model.
/// * `Err(Error::InvalidArgument)` - The name is unknown.
pub fn model_type_from_name(name: &str) -> Result<SentenceEmbeddingsModelType> {
    let normalized = name.trim().to_lowercase().replace('_', "-");
    match normalized.as_str() {
        "all-mini-lm-l12-v2" | "all-minilm-l12-v2" => Ok(SentenceEmbeddingsModelType::AllMiniLmL12V2),
        "all-mini-lm-l6-v2" | "all-minilm-l6-v2" => Ok(SentenceEmbeddingsModelType::AllMiniLmL6V2),
        "all-distilroberta-v1" => Ok(SentenceEmbeddingsModelType::AllDistilrobertaV1),
        "bert-base-nli-mean-tokens" => Ok(SentenceEmbeddingsModelType::BertBaseNliMeanTokens),
        "distiluse-base-multilingual-cased" => Ok(SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased),
        "paraphrase-albert-small-v2" => Ok(SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2),
        "sentence-t5-base" => Ok(SentenceEmbeddingsModelType::SentenceT5Base),
        _ => Err(Error::InvalidArgument(format!("unknown sentence encoder '{}'", name))),
    }
}

/// Resolve `cpu`, `cuda` or `cuda:<n>`; `None` picks CUDA when available.
pub fn device_from_name(name: Option<&str>) -> Result<Device> {
    let Some(name) = name else {
        return Ok(Device::cuda_if_available());
    };
    match name.trim().to_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Ok(Device::Cuda(0)),
        other => other
            .strip_prefix("cuda:")
            .and_then(|index| index.parse().ok())
            .map(Device::Cuda)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown device '{}'", name))),
    }
}

/// Sentence encoder backed by a Rust-BERT `SentenceEmbeddingsModel`.
///
/// # Fields
///
/// * `model` - The loaded model.
/// * `dim` - Embedding width, measured once at load time.
pub struct RustBertEncoder {
    model: SentenceEmbeddingsModel,
    dim: usize,
}

impl RustBertEncoder {
    /// Fetch and load a pretrained model. Blocks on network and disk I/O.
    ///
    /// # Returns
    ///
    /// * `Ok(RustBertEncoder)` - The loaded encoder.
    /// * `Err(Error::ResourceUnavailable)` - The model could not be fetched or built.
    pub fn load(model_type: SentenceEmbeddingsModelType, device: Device) -> Result<Self> {
        let model = SentenceEmbeddingsBuilder::remote(model_type)
            .with_device(device)
            .create_model()
            .map_err(|e| Error::ResourceUnavailable(e.to_string()))?;

        let dim = model
            .encode(&[DIMENSION_SAMPLE])
            .map_err(|e| Error::ResourceUnavailable(e.to_string()))?
            .first()
            .map(Vec::len)
            .filter(|&dim| dim > 0)
            .ok_or_else(|| Error::ResourceUnavailable("encoder produced no output".into()))?;

        debug!("Sentence encoder loaded on {:?} with {} dimensions", device, dim);
        Ok(Self { model, dim })
    }
}

impl SentenceEncoder for RustBertEncoder {
    fn encode(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.model
            .encode(batch)
            .map_err(|e| Error::Encoding(e.to_string()))
    }

    fn output_dim(&self) -> usize {
        self.dim
    }
}

type Loader<E> = Box<dyn Fn() -> Result<E> + Send + Sync>;

/// Owner of a lazily loaded sentence encoder.
///
/// The encoder is built on first use and shared by every `Embedder` handed out
/// afterwards. A failed load leaves the provider empty, so the next call tries
/// again.
pub struct EmbeddingProvider<E> {
    loader: Loader<E>,
    handle: Mutex<Option<Arc<E>>>,
}

impl<E: SentenceEncoder> EmbeddingProvider<E> {
    /// Create a provider that calls `loader` on first use.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<E> + Send + Sync + 'static,
    {
        Self { loader: Box::new(loader), handle: Mutex::new(None) }
    }

    /// Create a provider around an already loaded encoder.
    pub fn with_encoder(encoder: E) -> Self {
        Self {
            loader: Box::new(|| Err(Error::ResourceUnavailable("no loader configured".into()))),
            handle: Mutex::new(Some(Arc::new(encoder))),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn handle(&self) -> Result<Arc<E>> {
        let mut slot = self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(encoder) = slot.as_ref() {
            return Ok(Arc::clone(encoder));
        }
        info!("Getting sentence encoder");
        let encoder = Arc::new((self.loader)()?);
        *slot = Some(Arc::clone(&encoder));
        Ok(encoder)
    }

    /// Get the embedding function, loading the encoder if needed.
    pub fn embedder(&self) -> Result<Embedder<E>> {
        Ok(Embedder { encoder: self.handle()? })
    }

    /// Get the embedding width, loading the encoder if needed.
    pub fn embedding_size(&self) -> Result<usize> {
        Ok(self.handle()?.output_dim())
    }
}

impl EmbeddingProvider<RustBertEncoder> {
    /// Create a provider for the Rust-BERT model named in `config`.
    ///
    /// The model name and device are checked here; the model itself is only
    /// fetched on first use.
    pub fn from_config(config: &EncoderConfig) -> Result<Self> {
        let model_name = config.model.clone();
        model_type_from_name(&model_name)?;
        let device = device_from_name(config.device.as_deref())?;
        Ok(Self::new(move || {
            info!("Loading {} on {:?}", model_name, device);
            RustBertEncoder::load(model_type_from_name(&model_name)?, device)
        }))
    }
}

/// Maps batches of text to a `[batch_size, embedding_dim]` array.
pub struct Embedder<E> {
    encoder: Arc<E>,
}

impl<E> Clone for Embedder<E> {
    fn clone(&self) -> Self {
        Self { encoder: Arc::clone(&self.encoder) }
    }
}

impl<E: SentenceEncoder> Embedder<E> {
    pub fn dim(&self) -> usize {
        self.encoder.output_dim()
    }

    /// Embed a batch of sentences.
    ///
    /// # Returns
    ///
    /// * `Ok(Array2<f32>)` - One row per sentence.
    /// * `Err(Error::Encoding)` - The encoder failed or returned rows of the wrong width.
    pub fn embed<S: AsRef<str>>(&self, batch: &[S]) -> Result<Array2<f32>> {
        let dim = self.dim();
        if batch.is_empty() {
            return Ok(Array2::zeros((0, dim)));
        }

        let sentences: Vec<&str> = batch.iter().map(AsRef::as_ref).collect();
        let rows = self.encoder.encode(&sentences)?;
        if rows.len() != sentences.len() {
            return Err(Error::Encoding(format!(
                "expected {} vectors, encoder returned {}",
                sentences.len(), rows.len()
            )));
        }

        let mut flat = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(Error::Encoding(format!(
                    "vector {} has {} values, expected {}", i, row.len(), dim
                )));
            }
            flat.extend(row);
        }
        Array2::from_shape_vec((sentences.len(), dim), flat)
            .map_err(|e| Error::Encoding(e.to_string()))
    }

    /// Embed raw bytes, which must be valid UTF-8.
    ///
    /// # Returns
    ///
    /// * `Err(Error::TypeConversion)` - An entry is not valid UTF-8.
    pub fn embed_bytes<B: AsRef<[u8]>>(&self, batch: &[B]) -> Result<Array2<f32>> {
        let sentences = batch
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                std::str::from_utf8(bytes.as_ref())
                    .map_err(|e| Error::TypeConversion(format!("entry {}: {}", i, e)))
            })
            .collect::<Result<Vec<&str>>>()?;
        self.embed(&sentences)
    }

    /// Embed a `[n, 1]` or `[1, n]` column of sentences.
    ///
    /// # Returns
    ///
    /// * `Err(Error::TypeConversion)` - Neither axis has length 1.
    pub fn embed_column<S: AsRef<str>>(&self, column: ArrayView2<'_, S>) -> Result<Array2<f32>> {
        let squeezed: Vec<&str> = match column.dim() {
            (_, 1) => column.column(0).into_iter().map(AsRef::as_ref).collect(),
            (1, _) => column.row(0).into_iter().map(AsRef::as_ref).collect(),
            (rows, cols) => {
                return Err(Error::TypeConversion(format!(
                    "cannot squeeze a [{}, {}] batch to one sentence per row", rows, cols
                )))
            }
        };
        self.embed(&squeezed)
    }
}
