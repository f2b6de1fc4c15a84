use std::env;
use std::time::Instant;

use anyhow::{bail, Context};
use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use qa_embeddings::config::AppConfig;
use qa_embeddings::embedding::EmbeddingProvider;
use qa_embeddings::logging::{Level, Logger};
use qa_embeddings::word2vec::{build_dataset, generate_batch, read_corpus, SkipGramCursor, Vocabulary};

const USAGE: &str = "usage: qa-embeddings vocab [corpus] | qa-embeddings embed <sentence>...";

/// Macro to time the execution of a block of code
macro_rules! time_it {
    ($label:expr, $block:expr) => {{
        let start = Instant::now();
        let result = $block;
        let duration = start.elapsed();
        info!("{} took {:.8?}", $label, duration);
        result
    }};
}

fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    let logger = match Logger::init(config.log.clone()) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to set up logging to {}: {}", config.log.log_file, e);
            std::process::exit(2);
        }
    };

    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = run(&config, &args) {
        logger.log_event(Level::Error, "qa-embeddings failed", None, Some(&*e));
        std::process::exit(1);
    }
}

fn run(config: &AppConfig, args: &[String]) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        Some("vocab") => vocab(config, args.get(1).map(String::as_str)),
        Some("embed") if args.len() > 1 => embed(config, &args[1..]),
        _ => bail!(USAGE),
    }
}

/// Build the vocabulary, show a sample batch and walk the whole corpus once.
fn vocab(config: &AppConfig, corpus_path: Option<&str>) -> anyhow::Result<()> {
    let params = config.skip_gram;
    let words = read_corpus(corpus_path).context("reading corpus")?;

    let dataset = time_it!("Building vocabulary", build_dataset(&words, params.vocabulary_size)?);
    let vocabulary = &dataset.vocabulary;
    info!("Most common words (+UNK) {:?}", vocabulary.most_common(5));
    info!(
        "Sample data {:?} {:?}",
        &dataset.data[..dataset.data.len().min(10)],
        dataset.data.iter().take(10).map(|&id| token(vocabulary, id)).collect::<Vec<_>>()
    );

    let mut rng = fastrand::Rng::new();
    let sample = generate_batch(params.sample_batch_size(), params.num_skips, params.skip_window, &dataset.data, &mut rng)
        .context("generating sample batch")?;
    for (target, context) in sample.pairs() {
        println!(
            "{} {} -> {} {}",
            target, token(vocabulary, target), context, token(vocabulary, context)
        );
    }

    let mut cursor = SkipGramCursor::new(dataset.data.clone(), params.num_skips, params.skip_window)?;
    let groups_per_batch = params.batch_size / params.num_skips;
    if groups_per_batch == 0 {
        bail!("BATCH_SIZE must be at least NUM_SKIPS to walk the corpus");
    }
    let steps = cursor.windows_per_epoch().div_ceil(groups_per_batch);
    let pb = ProgressBar::new(steps as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")?);
    let mut pairs = 0;
    time_it!("Generating one epoch of batches", {
        for _ in 0..steps {
            pairs += cursor.next_batch(params.batch_size, &mut rng)?.len();
            pb.inc(1);
        }
    });
    pb.finish_with_message(format!("{} pairs", pairs));

    vocabulary
        .save_metadata(&config.metadata_path)
        .with_context(|| format!("writing {}", config.metadata_path))?;
    info!("Vocabulary metadata written to {}", config.metadata_path);
    Ok(())
}

/// Embed each sentence and print the shape and a preview of every vector.
fn embed(config: &AppConfig, sentences: &[String]) -> anyhow::Result<()> {
    let provider = EmbeddingProvider::from_config(&config.encoder)?;
    let embedder = time_it!("Loading sentence encoder", provider.embedder()?);
    let vectors = time_it!("Embedding", embedder.embed(sentences)?);

    println!("shape {:?}, embedding size {}", vectors.shape(), provider.embedding_size()?);
    for (sentence, row) in sentences.iter().zip(vectors.rows()) {
        let preview: Vec<f32> = row.iter().take(5).copied().collect();
        println!("{:?} -> {:?}...", sentence, preview);
    }
    Ok(())
}

fn token(vocabulary: &Vocabulary, id: usize) -> &str {
    vocabulary.token_of(id).unwrap_or("?")
}
