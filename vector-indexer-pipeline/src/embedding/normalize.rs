//! Vector normalization.

use serde::{Deserialize, Serialize};

use vector_indexer_shared::DistanceMeasure;

/// How dense vectors are normalized before storage and search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalizationPolicy {
    /// Scale every vector to unit L2 norm.
    UnitL2,
    /// Keep vectors as produced.
    None,
}

impl NormalizationPolicy {
    /// Default policy for an index distance measure.
    pub fn for_distance(distance: DistanceMeasure) -> Self {
        if distance.expects_unit_norm() {
            NormalizationPolicy::UnitL2
        } else {
            NormalizationPolicy::None
        }
    }

    /// Parse the configuration spelling (`UNIT_L2`, `NONE`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNIT_L2" | "L2" | "UNIT" => Some(NormalizationPolicy::UnitL2),
            "NONE" | "OFF" => Some(NormalizationPolicy::None),
            _ => None,
        }
    }

    pub fn apply(&self, vector: &mut [f32]) {
        if *self == NormalizationPolicy::UnitL2 {
            l2_normalize(vector);
        }
    }
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut vector = vec![3.0, 4.0];
        l2_normalize(&mut vector);
        assert_eq!(vector, vec![0.6, 0.8]);

        let mut zero = vec![0.0; 3];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);
    }

    #[test]
    fn test_policy_for_distance() {
        assert_eq!(
            NormalizationPolicy::for_distance(DistanceMeasure::DotProduct),
            NormalizationPolicy::UnitL2
        );
        assert_eq!(
            NormalizationPolicy::for_distance(DistanceMeasure::SquaredL2),
            NormalizationPolicy::None
        );

        let mut vector = vec![3.0, 4.0];
        NormalizationPolicy::None.apply(&mut vector);
        assert_eq!(vector, vec![3.0, 4.0]);
    }
}
