use std::collections::HashSet;
use std::fs;

use qa_embeddings::word2vec::{build_dataset, generate_batch, read_corpus, tokenize, SkipGramCursor, Vocabulary, UNK};
use qa_embeddings::Error;

fn random_corpus(rng: &mut fastrand::Rng, len: usize, distinct: usize) -> Vec<String> {
    (0..len).map(|_| format!("w{}", rng.usize(..distinct))).collect()
}

#[test]
fn vocabulary_invariants_hold_for_random_corpora() {
    let mut rng = fastrand::Rng::with_seed(42);
    for _ in 0..50 {
        let len = rng.usize(1..200);
        let alphabet = rng.usize(1..40);
        let words = random_corpus(&mut rng, len, alphabet);
        let distinct = words.iter().collect::<HashSet<_>>().len();
        let n_words = rng.usize(1..60);

        let dataset = build_dataset(&words, n_words).unwrap();
        let vocab = &dataset.vocabulary;

        assert_eq!(vocab.dictionary.len(), n_words.min(distinct + 1));
        assert_eq!(vocab.dictionary[UNK], 0);
        for (token, &id) in &vocab.dictionary {
            assert_eq!(&vocab.reversed_dictionary[id], token);
        }
        assert_eq!(vocab.count.iter().map(|(_, freq)| freq).sum::<usize>(), words.len());
        assert!(vocab.count[1..].windows(2).all(|pair| pair[0].1 >= pair[1].1));
        assert_eq!(dataset.data.len(), words.len());
        for (word, &id) in words.iter().zip(&dataset.data) {
            assert_eq!(id, vocab.dictionary.get(word).copied().unwrap_or(0));
        }
    }
}

#[test]
fn labels_stay_within_the_window() {
    let mut rng = fastrand::Rng::with_seed(7);
    // distinct IDs so a label identifies its position
    let data: Vec<usize> = (100..160).collect();
    for skip_window in 1..4 {
        for num_skips in 1..=2 * skip_window {
            let batch_size = num_skips * 12;
            let out = generate_batch(batch_size, num_skips, skip_window, &data, &mut rng).unwrap();
            assert_eq!(out.batch.len(), batch_size);
            assert_eq!(out.labels.shape(), &[batch_size, 1]);

            for group in out.pairs().collect::<Vec<_>>().chunks(num_skips) {
                let contexts: HashSet<usize> = group.iter().map(|&(_, c)| c).collect();
                assert_eq!(contexts.len(), num_skips, "contexts drawn without replacement");
                for &(target, context) in group {
                    assert_ne!(target, context);
                    assert!(target.abs_diff(context) <= skip_window);
                }
            }
        }
    }
}

#[test]
fn seeded_rng_makes_batches_reproducible() {
    let data: Vec<usize> = (0..30).map(|i| i % 7).collect();
    let a = generate_batch(16, 2, 2, &data, &mut fastrand::Rng::with_seed(99)).unwrap();
    let b = generate_batch(16, 2, 2, &data, &mut fastrand::Rng::with_seed(99)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn generate_batch_restarts_from_the_beginning_every_call() {
    let data: Vec<usize> = (0..20).collect();
    let mut rng = fastrand::Rng::with_seed(5);
    let first = generate_batch(8, 2, 1, &data, &mut rng).unwrap();
    let second = generate_batch(8, 2, 1, &data, &mut rng).unwrap();
    // same windows both times: the cursor is not carried over
    assert_eq!(first.batch, second.batch);

    let mut cursor = SkipGramCursor::new(data, 2, 1).unwrap();
    let first = cursor.next_batch(8, &mut rng).unwrap();
    let second = cursor.next_batch(8, &mut rng).unwrap();
    assert_ne!(first.batch, second.batch);
    assert_eq!(second.batch[0], first.batch[7] + 1);
}

#[test]
fn short_data_is_rejected() {
    let mut rng = fastrand::Rng::new();
    let err = generate_batch(2, 2, 2, &[1, 2, 3], &mut rng).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { needed: 5, len: 3 }));
    assert!(SkipGramCursor::new(vec![], 0, 0).is_err());
}

#[test]
fn corpus_to_batches_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("corpus.txt");
    fs::write(&corpus, "The cat sat on the mat.\nThe dog sat on the log!\n").unwrap();

    let words = read_corpus(corpus.to_str()).unwrap();
    assert_eq!(words, tokenize("the cat sat on the mat the dog sat on the log"));

    let dataset = build_dataset(&words, 4).unwrap();
    let vocab = &dataset.vocabulary;
    assert_eq!(vocab.reversed_dictionary, vec!["UNK", "the", "sat", "on"]);
    assert_eq!(vocab.count[0], (UNK.to_string(), 4));

    let mut cursor = SkipGramCursor::new(dataset.data.clone(), 4, 2).unwrap();
    let mut rng = fastrand::Rng::with_seed(1);
    for _ in 0..5 {
        let out = cursor.next_batch(8, &mut rng).unwrap();
        assert_eq!(out.len(), 8);
        assert!(out.pairs().all(|(t, c)| t < vocab.len() && c < vocab.len()));
    }
}

#[test]
fn vocabulary_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let words = ["b", "a", "b", "c", "b", "a"];
    let vocab = build_dataset(&words, 3).unwrap().vocabulary;

    let json = dir.path().join("vocab.json");
    vocab.save(&json).unwrap();
    assert_eq!(Vocabulary::load(&json).unwrap(), vocab);

    let metadata = dir.path().join("nested").join("metadata.tsv");
    vocab.save_metadata(&metadata).unwrap();
    assert_eq!(fs::read_to_string(&metadata).unwrap(), "UNK\nb\na\n");
}

#[test]
fn missing_corpus_is_an_io_error() {
    let err = read_corpus(Some("does/not/exist.txt")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
