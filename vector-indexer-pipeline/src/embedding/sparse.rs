//! BM25-style sparse vectors for hybrid search.

use std::collections::BTreeMap;

use vector_indexer_shared::SparseVector;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Configuration for sparse vector generation.
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Size of the term id space.
    pub dimension: u32,
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength.
    pub b: f32,
    /// Assumed average document length in tokens.
    pub avg_doc_len: f32,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            dimension: 262_144,
            k1: 1.2,
            b: 0.75,
            avg_doc_len: 64.0,
        }
    }
}

/// Deterministic text to sparse vector encoder.
#[derive(Debug, Clone)]
pub struct SparseEncoder {
    config: SparseConfig,
}

impl SparseEncoder {
    pub fn new(config: SparseConfig) -> Self {
        Self { config }
    }

    /// Lowercase tokens of at least two characters, split on non-alphanumerics.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() >= 2)
            .map(str::to_lowercase)
            .collect()
    }

    /// Term id of a token.
    pub fn term_id(&self, token: &str) -> u32 {
        fnv1a_32(token.as_bytes()) % self.config.dimension.max(1)
    }

    /// Encode text with BM25 term-frequency saturation.
    pub fn encode(&self, text: &str) -> SparseVector {
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return SparseVector::default();
        }

        let mut frequencies: BTreeMap<u32, f32> = BTreeMap::new();
        for token in &tokens {
            *frequencies.entry(self.term_id(token)).or_insert(0.0) += 1.0;
        }

        let SparseConfig { k1, b, avg_doc_len, .. } = self.config;
        let length_ratio = tokens.len() as f32 / avg_doc_len.max(f32::EPSILON);
        let norm = k1 * (1.0 - b + b * length_ratio);

        SparseVector::from_pairs(
            frequencies
                .into_iter()
                .map(|(term, tf)| (term, tf * (k1 + 1.0) / (tf + norm))),
        )
    }
}

impl Default for SparseEncoder {
    fn default() -> Self {
        Self::new(SparseConfig::default())
    }
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            SparseEncoder::tokenize("Intro to Rust: a 2-day course!"),
            vec!["intro", "to", "rust", "day", "course"]
        );
    }

    #[test]
    fn test_fnv_known_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_encode_weights() {
        let encoder = SparseEncoder::new(SparseConfig {
            avg_doc_len: 3.0,
            ..Default::default()
        });
        let vector = encoder.encode("rust rust code");

        let rust = vector.get(encoder.term_id("rust")).unwrap();
        let code = vector.get(encoder.term_id("code")).unwrap();
        // tf=2 at average length: 2 * 2.2 / (2 + 1.2)
        assert!((rust - 1.375).abs() < 1e-6);
        assert!((code - 1.0).abs() < 1e-6);
        assert_eq!(vector.len(), 2);
        assert!(vector.values.iter().all(|w| *w >= 0.0));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = SparseEncoder::default();
        assert_eq!(encoder.encode("hello world"), encoder.encode("hello world"));
        assert!(encoder.encode("a ! ?").is_empty());
    }
}
