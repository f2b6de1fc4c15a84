//! Skip-gram dataset preparation.
//!
//! Adapted from the TensorFlow `word2vec_basic` tutorial, which in turn follows
//! "Distributed Representations of Words and Phrases and their Compositionality"
//! by Tomas Mikolov, Kai Chen, Greg Corrado, and Jeffrey Dean.
//!
//! https://arxiv.org/abs/1310.4546
//!
//! ## Key Features
//!
//! ### Vocabulary:
//!
//! `build_dataset` keeps the `n_words - 1` most frequent tokens, reserves ID 0
//! for `UNK` and encodes the token stream as integer IDs.
//!
//! ### Batches:
//!
//! `generate_batch` slides a `2 * skip_window + 1` window over the encoded
//! stream and draws `(target, context)` pairs from it. Each call starts again
//! from the beginning of the data. `SkipGramCursor` keeps its position between
//! batches instead.
//!
//! ### Corpus Handling:
//!
//! `read_corpus` and `tokenize` lower-case text and strip punctuation.
//!
//! # Examples
//!
//! ```
//! use qa_embeddings::word2vec::{build_dataset, generate_batch};
//!
//! let words = ["the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog"];
//! let dataset = build_dataset(&words, 5).unwrap();
//! let mut rng = fastrand::Rng::with_seed(7);
//! let batch = generate_batch(8, 2, 1, &dataset.data, &mut rng).unwrap();
//! assert_eq!(batch.labels.shape(), &[8, 1]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Token reserved for out-of-vocabulary words. Always ID 0.
pub const UNK: &str = "UNK";
/// ID of the `UNK` token.
pub const UNK_ID: usize = 0;
/// Default path for the corpus.
pub const DEFAULT_CORPUS_PATH: &str = "data/word2vec_corpus.txt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Frequency-ranked vocabulary.
///
/// # Fields
///
/// * `count` - `(token, frequency)` pairs; entry 0 is `UNK` with the number of
///   tokens that fell outside the vocabulary, the rest by descending frequency.
/// * `dictionary` - Token to ID mapping.
/// * `reversed_dictionary` - ID to token mapping, indexed by ID.
pub struct Vocabulary {
    pub count: Vec<(String, usize)>,
    pub dictionary: HashMap<String, usize>,
    pub reversed_dictionary: Vec<String>,
}

impl Vocabulary {
    pub fn len(&self) -> usize {
        self.reversed_dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reversed_dictionary.is_empty()
    }

    /// ID of `token`, or `UNK_ID` when it is not in the vocabulary.
    pub fn id_of(&self, token: &str) -> usize {
        self.dictionary.get(token).copied().unwrap_or(UNK_ID)
    }

    pub fn token_of(&self, id: usize) -> Option<&str> {
        self.reversed_dictionary.get(id).map(String::as_str)
    }

    /// The first `k` entries of `count`, `UNK` included.
    pub fn most_common(&self, k: usize) -> &[(String, usize)] {
        &self.count[..k.min(self.count.len())]
    }

    /// Save the vocabulary as JSON.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the vocabulary file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a vocabulary written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write one token per line in ID order, the projector metadata layout.
    pub fn save_metadata<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        for token in &self.reversed_dictionary {
            writeln!(writer, "{}", token)?;
        }
        writer.flush()?;
        debug!("Wrote {} vocabulary entries to {}", self.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Encoded token stream together with its vocabulary.
///
/// # Fields
///
/// * `data` - One ID per input token.
/// * `vocabulary` - The vocabulary used to encode `data`.
pub struct Dataset {
    pub data: Vec<usize>,
    pub vocabulary: Vocabulary,
}

/// Build a vocabulary of at most `n_words` entries and encode `words` with it.
///
/// Tokens with equal frequency keep the order of their first occurrence.
/// A literal `UNK` in the input is treated as out-of-vocabulary.
///
/// # Arguments
///
/// * `words` - The token stream.
/// * `n_words` - Maximum vocabulary size, `UNK` included.
///
/// # Returns
///
/// * `Ok(Dataset)` - The encoded stream and its vocabulary.
/// * `Err(Error::InvalidArgument)` - `n_words` is zero.
pub fn build_dataset<S>(words: &[S], n_words: usize) -> Result<Dataset>
where
    S: AsRef<str> + Sync,
{
    if n_words < 1 {
        return Err(Error::InvalidArgument("n_words must be at least 1".into()));
    }

    // token -> (frequency, first position)
    let mut frequencies: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in words.iter().enumerate() {
        let word = word.as_ref();
        if word == UNK {
            continue;
        }
        frequencies.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = frequencies
        .into_iter()
        .map(|(word, (freq, first))| (word, freq, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(n_words - 1);

    let mut count = Vec::with_capacity(ranked.len() + 1);
    let mut dictionary = HashMap::with_capacity(ranked.len() + 1);
    let mut reversed_dictionary = Vec::with_capacity(ranked.len() + 1);

    count.push((UNK.to_string(), 0));
    dictionary.insert(UNK.to_string(), UNK_ID);
    reversed_dictionary.push(UNK.to_string());
    for (word, freq, _) in ranked {
        dictionary.insert(word.to_string(), reversed_dictionary.len());
        reversed_dictionary.push(word.to_string());
        count.push((word.to_string(), freq));
    }

    let data: Vec<usize> = words
        .par_iter()
        .map(|word| dictionary.get(word.as_ref()).copied().unwrap_or(UNK_ID))
        .collect();
    let unk_count = data.iter().filter(|&&id| id == UNK_ID).count();
    count[0].1 = unk_count;

    info!(
        "Built vocabulary of {} entries from {} tokens ({} mapped to {})",
        reversed_dictionary.len(), words.len(), unk_count, UNK
    );

    Ok(Dataset {
        data,
        vocabulary: Vocabulary { count, dictionary, reversed_dictionary },
    })
}

#[derive(Debug, Clone, PartialEq)]
/// One batch of skip-gram training pairs.
///
/// # Fields
///
/// * `batch` - Target IDs, shape `[batch_size]`.
/// * `labels` - Context IDs, shape `[batch_size, 1]`.
pub struct SkipGramBatch {
    pub batch: Array1<usize>,
    pub labels: Array2<usize>,
}

impl SkipGramBatch {
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// `(target, context)` pairs in emission order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.batch.iter().copied().zip(self.labels.column(0).into_iter().copied())
    }
}

/// Generate one batch of skip-gram pairs from the start of `data`.
///
/// The window is rebuilt from index 0 on every call, so consecutive calls do
/// not continue where the previous one stopped. Use `SkipGramCursor` for a
/// continuous stream.
///
/// # Arguments
///
/// * `batch_size` - Number of pairs; must be a multiple of `num_skips`.
/// * `num_skips` - Pairs drawn per window; at most `2 * skip_window`.
/// * `skip_window` - Context radius on each side of the target.
/// * `data` - Encoded token stream, at least `2 * skip_window + 1` long.
/// * `rng` - Source of randomness for context sampling.
///
/// # Returns
///
/// * `Ok(SkipGramBatch)` - The generated batch.
/// * `Err(Error::InvalidArgument)` - The parameters are inconsistent.
/// * `Err(Error::IndexOutOfRange)` - `data` is shorter than one window.
pub fn generate_batch(
    batch_size: usize,
    num_skips: usize,
    skip_window: usize,
    data: &[usize],
    rng: &mut fastrand::Rng,
) -> Result<SkipGramBatch> {
    let mut window = SkipWindow::new(num_skips, skip_window, data)?;
    window.check_batch_size(batch_size)?;
    window.reset_at(0);
    let mut data_index = window.span;
    let batch = window.fill(batch_size, &mut data_index, rng);
    // The cursor is dropped here; the next call starts over from index 0.
    debug!("generate_batch finished at data index {} (discarded)", data_index);
    Ok(batch)
}

/// Skip-gram batch generator that keeps its position in the data between
/// batches.
///
/// # Examples
///
/// ```
/// use qa_embeddings::word2vec::SkipGramCursor;
///
/// let mut cursor = SkipGramCursor::new(vec![1, 2, 3, 4, 5, 6], 2, 1).unwrap();
/// let mut rng = fastrand::Rng::with_seed(1);
/// let first = cursor.next_batch(2, &mut rng).unwrap();
/// let second = cursor.next_batch(2, &mut rng).unwrap();
/// assert_eq!(first.batch[0], 2);
/// assert_eq!(second.batch[0], 3);
/// ```
#[derive(Debug, Clone)]
pub struct SkipGramCursor {
    data: Vec<usize>,
    skip_window: usize,
    num_skips: usize,
    data_index: usize,
}

impl SkipGramCursor {
    /// Create a cursor positioned at the start of `data`.
    ///
    /// `num_skips` and `skip_window` follow the same order as in `generate_batch`.
    pub fn new(data: Vec<usize>, num_skips: usize, skip_window: usize) -> Result<Self> {
        SkipWindow::new(num_skips, skip_window, &data)?;
        Ok(Self { data, skip_window, num_skips, data_index: 0 })
    }

    /// Position the next batch will start reading from.
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    /// Number of windows in one pass over the data.
    pub fn windows_per_epoch(&self) -> usize {
        self.data.len() - (2 * self.skip_window + 1) + 1
    }

    /// Generate the next batch, continuing from where the previous one stopped.
    pub fn next_batch(&mut self, batch_size: usize, rng: &mut fastrand::Rng) -> Result<SkipGramBatch> {
        let mut window = SkipWindow::new(self.num_skips, self.skip_window, &self.data)?;
        window.check_batch_size(batch_size)?;
        let span = window.span;
        let len = self.data.len();

        if self.data_index + span > len {
            self.data_index = 0;
        }
        window.reset_at(self.data_index);
        self.data_index += span;

        let batch = window.fill(batch_size, &mut self.data_index, rng);
        // Backtrack so the words at the end of this batch open the next one.
        self.data_index = (self.data_index + len - span) % len;
        Ok(batch)
    }
}

/// Window state shared by `generate_batch` and `SkipGramCursor`.
struct SkipWindow<'a> {
    data: &'a [usize],
    buffer: VecDeque<usize>,
    span: usize,
    skip_window: usize,
    num_skips: usize,
}

impl<'a> SkipWindow<'a> {
    fn new(num_skips: usize, skip_window: usize, data: &'a [usize]) -> Result<Self> {
        if num_skips == 0 {
            return Err(Error::InvalidArgument("num_skips must be at least 1".into()));
        }
        if num_skips > 2 * skip_window {
            return Err(Error::InvalidArgument(format!(
                "num_skips ({}) must not exceed 2 * skip_window ({})",
                num_skips, 2 * skip_window
            )));
        }
        let span = 2 * skip_window + 1;
        if data.len() < span {
            return Err(Error::IndexOutOfRange { needed: span, len: data.len() });
        }
        Ok(Self {
            data,
            buffer: VecDeque::with_capacity(span),
            span,
            skip_window,
            num_skips,
        })
    }

    fn reset_at(&mut self, start: usize) {
        self.buffer.clear();
        self.buffer.extend(&self.data[start..start + self.span]);
    }

    fn slide(&mut self, data_index: &mut usize) {
        if *data_index == self.data.len() {
            self.reset_at(0);
            *data_index = self.span;
        } else {
            self.buffer.pop_front();
            self.buffer.push_back(self.data[*data_index]);
            *data_index += 1;
        }
    }

    fn check_batch_size(&self, batch_size: usize) -> Result<()> {
        if batch_size % self.num_skips != 0 {
            return Err(Error::InvalidArgument(format!(
                "batch_size ({}) must be a multiple of num_skips ({})",
                batch_size, self.num_skips
            )));
        }
        Ok(())
    }

    /// Emit `batch_size` pairs from the loaded window, sliding it after each
    /// group of `num_skips`.
    fn fill(
        &mut self,
        batch_size: usize,
        data_index: &mut usize,
        rng: &mut fastrand::Rng,
    ) -> SkipGramBatch {
        let mut batch = Vec::with_capacity(batch_size);
        let mut labels = Vec::with_capacity(batch_size);
        let mut context_positions: Vec<usize> =
            (0..self.span).filter(|&w| w != self.skip_window).collect();

        for _ in 0..batch_size / self.num_skips {
            rng.shuffle(&mut context_positions);
            let target = self.buffer[self.skip_window];
            for &position in &context_positions[..self.num_skips] {
                batch.push(target);
                labels.push(self.buffer[position]);
            }
            self.slide(data_index);
        }

        SkipGramBatch {
            batch: Array1::from(batch),
            labels: Array1::from(labels).insert_axis(Axis(1)),
        }
    }
}

fn punctuation() -> &'static Regex {
    static PUNCTUATION: OnceLock<Regex> = OnceLock::new();
    PUNCTUATION.get_or_init(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"))
}

/// Lower-case `text`, strip punctuation and split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowercased = text.to_lowercase();
    punctuation()
        .replace_all(&lowercased, "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Read a corpus file into a token stream.
///
/// # Arguments
///
/// * `path` - The path to the corpus file, `DEFAULT_CORPUS_PATH` when `None`.
///
/// # Returns
///
/// * `Ok(Vec<String>)` - Every token of the file, in order.
/// * `Err(Error::Io)` - The file could not be read.
pub fn read_corpus(path: Option<&str>) -> Result<Vec<String>> {
    let path = path.unwrap_or(DEFAULT_CORPUS_PATH);
    let reader = BufReader::new(File::open(path)?);
    let mut words = Vec::new();
    for line in reader.lines() {
        words.extend(tokenize(&line?));
    }
    info!("Read {} tokens from {}", words.len(), path);
    Ok(words)
}
