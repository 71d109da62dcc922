//! Vector value types.

use serde::{Deserialize, Serialize};

/// Sparse term-weight vector in the index wire format.
///
/// `dimensions[i]` carries the weight `values[i]`. Dimensions are kept sorted
/// and unique by [`SparseVector::from_pairs`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector {
    /// Term weights.
    pub values: Vec<f32>,
    /// Term identifiers.
    pub dimensions: Vec<u32>,
}

impl SparseVector {
    /// Build a sparse vector from `(dimension, weight)` pairs.
    ///
    /// Duplicate dimensions are summed and zero weights dropped.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut merged = std::collections::BTreeMap::new();
        for (dimension, weight) in pairs {
            *merged.entry(dimension).or_insert(0.0f32) += weight;
        }

        let mut vector = Self::default();
        for (dimension, weight) in merged {
            if weight != 0.0 {
                vector.dimensions.push(dimension);
                vector.values.push(weight);
            }
        }
        vector
    }

    /// Number of non-zero terms.
    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    /// Whether the vector has no terms.
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Weight for a dimension, if present.
    pub fn get(&self, dimension: u32) -> Option<f32> {
        self.dimensions
            .binary_search(&dimension)
            .ok()
            .map(|idx| self.values[idx])
    }

    /// Dot product with another sparse vector.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        self.dimensions
            .iter()
            .zip(&self.values)
            .filter_map(|(dim, value)| other.get(*dim).map(|w| w * value))
            .sum()
    }
}

/// Distance measure the index was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistanceMeasure {
    /// Inner product; expects unit-norm vectors for cosine-equivalent ranking.
    #[default]
    DotProduct,
    /// Cosine similarity.
    Cosine,
    /// Squared euclidean distance.
    SquaredL2,
}

impl DistanceMeasure {
    /// Parse the configuration spelling (`DOT_PRODUCT`, `COSINE`, `SQUARED_L2`/`L2_NORM`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DOT_PRODUCT" | "DOT_PRODUCT_DISTANCE" => Some(Self::DotProduct),
            "COSINE" | "COSINE_DISTANCE" => Some(Self::Cosine),
            "SQUARED_L2" | "L2_NORM" | "SQUARED_L2_DISTANCE" => Some(Self::SquaredL2),
            _ => None,
        }
    }

    /// Whether stored and query vectors are expected to be unit-norm.
    pub fn expects_unit_norm(&self) -> bool {
        matches!(self, Self::DotProduct | Self::Cosine)
    }

    /// Similarity score for two dense vectors. Higher is closer for every measure.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::DotProduct => dot(a, b),
            Self::Cosine => {
                let denom = norm(a) * norm(b);
                if denom == 0.0 {
                    0.0
                } else {
                    dot(a, b) / denom
                }
            }
            Self::SquaredL2 => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>(),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}
