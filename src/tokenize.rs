use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::logging;

/// Token counting for dataset statistics.
pub trait Tokenizer {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn count_tokens(&self, text: &str) -> usize {
        (*self).count_tokens(text)
    }
}

fn pretokenizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+")
            .expect("pretokenizer pattern is valid")
    })
}

/// Counts GPT-2 style pre-tokens: contractions, letter runs, digit runs and
/// punctuation runs, each optionally led by one space. Undercounts real BPE
/// output on rare words.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        pretokenizer().find_iter(text).count()
    }
}

/// A HuggingFace `tokenizer.json`.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, tokenizers::Error> {
        let inner = tokenizers::Tokenizer::from_file(path)?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.get_ids().len(),
            Err(err) => {
                logging::warn(format!(
                    "tokenizer failed, falling back to approximate count: {}",
                    err
                ));
                ApproxTokenizer.count_tokens(text)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenStats {
    pub records: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

impl TokenStats {
    pub fn from_counts(counts: &[usize]) -> Option<Self> {
        let min = *counts.iter().min()?;
        let max = *counts.iter().max()?;
        let total: usize = counts.iter().sum();
        Some(Self {
            records: counts.len(),
            min,
            max,
            mean: total as f64 / counts.len() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_counts_words_numbers_and_punctuation() {
        let t = ApproxTokenizer;
        assert_eq!(t.count_tokens(""), 0);
        assert_eq!(t.count_tokens("Hello world"), 2);
        assert_eq!(t.count_tokens("Ticket ID: 42 it's fine!"), 8);
    }

    #[test]
    fn reference_impl_forwards() {
        let t = ApproxTokenizer;
        let by_ref: &dyn Tokenizer = &t;
        assert_eq!((&by_ref).count_tokens("a b c"), 3);
    }

    #[test]
    fn stats_over_counts() {
        let stats = TokenStats::from_counts(&[4, 10, 1]).expect("stats");
        assert_eq!(stats.records, 3);
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 10);
        assert!((stats.mean - 5.0).abs() < f64::EPSILON);
        assert!(TokenStats::from_counts(&[]).is_none());
    }

    #[test]
    fn missing_tokenizer_file_is_an_error() {
        assert!(HfTokenizer::from_file(Path::new("/nonexistent/tokenizer.json")).is_err());
    }
}
