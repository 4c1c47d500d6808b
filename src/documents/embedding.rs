//! Hashed character n-gram embeddings
//!
//! Deterministic, model-free text vectors: every character trigram of the
//! lowercased text is hashed into one of `dimension` signed buckets and the
//! result is L2-normalized.

use crate::documents::IndexError;

/// Embedding model used when a request names none
pub const DEFAULT_EMBEDDING_MODEL: &str = "ngram-hash-384";

const MODEL_PREFIX: &str = "ngram-hash-";
const NGRAM: usize = 3;
const MAX_DIMENSION: usize = 8192;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Resolve an embedding model name such as `ngram-hash-512`
    pub fn from_model_name(name: &str) -> Result<Self, IndexError> {
        let dimension = name
            .strip_prefix(MODEL_PREFIX)
            .and_then(|d| d.parse::<usize>().ok())
            .filter(|d| (1..=MAX_DIMENSION).contains(d))
            .ok_or_else(|| IndexError::UnknownEmbeddingModel(name.to_string()))?;
        Ok(Self { dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> String {
        format!("{MODEL_PREFIX}{}", self.dimension)
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text
            .to_lowercase()
            .split_whitespace()
            .flat_map(|word| std::iter::once(' ').chain(word.chars()))
            .chain(std::iter::once(' '))
            .collect();

        if chars.len() < NGRAM {
            return vector;
        }

        for gram in chars.windows(NGRAM) {
            let hash = fnv1a(gram);
            let bucket = (hash % self.dimension as u64) as usize;
            // High bit picks the sign so unrelated grams tend to cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut hash = FNV_OFFSET;
    let mut buf = [0u8; 4];
    for c in chars {
        for byte in c.encode_utf8(&mut buf).as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine similarity; 0.0 when either vector is zero or the lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
