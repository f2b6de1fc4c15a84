use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use ndarray::Array2;
use qa_embeddings::embedding::{EmbeddingProvider, SentenceEncoder};
use qa_embeddings::{Error, Result};

/// One-hot encoder over the first byte of each sentence.
struct FirstLetterEncoder;

impl SentenceEncoder for FirstLetterEncoder {
    fn encode(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        batch
            .iter()
            .map(|sentence| -> Result<Vec<f32>> {
                let byte = sentence
                    .bytes()
                    .next()
                    .ok_or_else(|| Error::Encoding("empty sentence".into()))?;
                let mut vector = vec![0.0; 26];
                vector[(byte.to_ascii_lowercase().wrapping_sub(b'a') % 26) as usize] = 1.0;
                Ok(vector)
            })
            .collect()
    }

    fn output_dim(&self) -> usize {
        26
    }
}

#[test]
fn concurrent_first_use_loads_once() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let provider = Arc::new(EmbeddingProvider::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(20));
        Ok(FirstLetterEncoder)
    }));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provider = Arc::clone(&provider);
            thread::spawn(move || provider.embedding_size().unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 26);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn embedder_outlives_further_calls() {
    let provider = EmbeddingProvider::with_encoder(FirstLetterEncoder);
    let embedder = provider.embedder().unwrap();
    let other = embedder.clone();

    let questions = vec!["Apple?".to_string(), "banana".to_string(), "Cherry".to_string()];
    let out: Array2<f32> = embedder.embed(&questions).unwrap();
    assert_eq!(out.shape(), &[3, provider.embedding_size().unwrap()]);
    for (row, expected) in out.rows().into_iter().zip([0usize, 1, 2]) {
        assert_eq!(row[expected], 1.0);
        assert_eq!(row.sum(), 1.0);
    }
    assert_eq!(other.embed(&questions).unwrap(), out);
}

#[test]
fn encoder_errors_propagate() {
    let embedder = EmbeddingProvider::with_encoder(FirstLetterEncoder).embedder().unwrap();
    assert!(matches!(embedder.embed(&["ok", ""]), Err(Error::Encoding(_))));
}

#[test]
fn unavailable_resource_surfaces_from_both_accessors() {
    let provider: EmbeddingProvider<FirstLetterEncoder> =
        EmbeddingProvider::new(|| Err(Error::ResourceUnavailable("no network".into())));
    assert!(matches!(provider.embedder(), Err(Error::ResourceUnavailable(_))));
    assert!(matches!(provider.embedding_size(), Err(Error::ResourceUnavailable(_))));
    assert!(!provider.is_loaded());
}
