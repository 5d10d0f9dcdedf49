//! Vector Operations
//!
//! Pure functions over equal-length `f64` slices plus a deterministic
//! Gaussian sampler. These are the innermost kernels of the map engine and
//! the relevance scorer; they validate inputs and fail fast, nothing else.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{CoreError, Result};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Norms below this are treated as zero vectors
pub const NORM_EPSILON: f64 = 1e-10;

// ============================================================================
// DISTANCE METRICS
// ============================================================================

/// Distance metric used by BMU search and cluster extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Angular distance, `1 - cos(a, b)`; the default for text embeddings
    #[default]
    Cosine,
    /// Straight-line distance in embedding space
    Euclidean,
    /// Sum of per-component absolute differences
    Manhattan,
}

impl DistanceMetric {
    /// Compute the distance between `a` and `b` under this metric
    pub fn distance(&self, a: &[f64], b: &[f64]) -> Result<f64> {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::Manhattan => manhattan_distance(a, b),
        }
    }
}

fn check_dims(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(CoreError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(())
}

/// Cosine distance: `1 - clamp(dot/(|a||b|), -1, 1)`.
///
/// Degenerate vectors (norm below [`NORM_EPSILON`]) are maximally distant
/// from everything, including themselves: the result is 1.0.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    check_dims(a, b)?;

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return Ok(1.0);
    }

    Ok(1.0 - (dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Cosine similarity for ranking: `1 - cosine_distance`
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    Ok(1.0 - cosine_distance(a, b)?)
}

/// Euclidean distance between two vectors
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    check_dims(a, b)?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt())
}

/// Manhattan (L1) distance between two vectors
pub fn manhattan_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    check_dims(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum())
}

/// Dot product between two equal-length vectors
#[inline]
pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector
#[inline]
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Normalize a vector to unit length in place.
///
/// Vectors with norm below [`NORM_EPSILON`] are left untouched; callers that
/// care must treat them as degenerate rather than silently renormalizing.
pub fn normalize_in_place(v: &mut [f64]) {
    let n = norm(v);
    if n >= NORM_EPSILON {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
}

/// Return a unit-length copy of `v`
pub fn normalized(v: &[f64]) -> Vec<f64> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out);
    out
}

// ============================================================================
// GAUSSIAN SAMPLER
// ============================================================================

/// Deterministic Gaussian RNG via the Box-Muller transform.
///
/// Generates pairs and caches the spare value across calls, so consecutive
/// draws from the same seed form a reproducible sequence. Seedable for
/// deterministic training runs and tests.
#[derive(Debug)]
pub struct GaussianSampler {
    rng: StdRng,
    spare: Option<f64>,
}

impl GaussianSampler {
    /// Create a sampler from an explicit seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            spare: None,
        }
    }

    /// Create a sampler seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            spare: None,
        }
    }

    /// Draw one standard-normal sample (mean 0, stddev 1)
    pub fn next_gaussian(&mut self) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }

        // Box-Muller: u1 must be strictly positive for the log
        let mut u1: f64 = self.rng.gen();
        while u1 <= f64::MIN_POSITIVE {
            u1 = self.rng.gen();
        }
        let u2: f64 = self.rng.gen();

        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        self.spare = Some(r * theta.sin());
        r * theta.cos()
    }

    /// Draw a sample with the given mean and standard deviation
    pub fn next_gaussian_with(&mut self, mean: f64, stddev: f64) -> f64 {
        mean + stddev * self.next_gaussian()
    }

    /// Access the underlying uniform RNG (shuffles, index draws)
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance_identity_and_range() {
        let a = vec![0.3, -0.7, 0.2, 0.9];
        assert!(cosine_distance(&a, &a).unwrap().abs() < 1e-12);

        let b = vec![-0.3, 0.7, -0.2, -0.9];
        let d = cosine_distance(&a, &b).unwrap();
        assert!((d - 2.0).abs() < 1e-12);
        assert!((0.0..=2.0).contains(&d));
    }

    #[test]
    fn test_cosine_distance_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-2.0, 0.5, 4.0];
        let d1 = cosine_distance(&a, &b).unwrap();
        let d2 = cosine_distance(&b, &a).unwrap();
        assert!((d1 - d2).abs() < 1e-15);
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        let zero = vec![0.0, 0.0, 0.0];
        let a = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_distance(&zero, &a).unwrap(), 1.0);
        assert_eq!(cosine_distance(&zero, &zero).unwrap(), 1.0);
    }

    #[test]
    fn test_euclidean_and_manhattan() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((euclidean_distance(&a, &b).unwrap() - 5.0).abs() < 1e-12);
        assert!((manhattan_distance(&a, &b).unwrap() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            cosine_distance(&a, &b),
            Err(CoreError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(euclidean_distance(&a, &b).is_err());
        assert!(manhattan_distance(&a, &b).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize_in_place(&mut v);
        assert!((norm(&v) - 1.0).abs() < 1e-12);

        // Degenerate vector stays put
        let mut z = vec![0.0, 0.0];
        normalize_in_place(&mut z);
        assert_eq!(z, vec![0.0, 0.0]);
    }

    #[test]
    fn test_gaussian_sampler_deterministic() {
        let mut a = GaussianSampler::seeded(42);
        let mut b = GaussianSampler::seeded(42);
        for _ in 0..100 {
            assert_eq!(a.next_gaussian(), b.next_gaussian());
        }
    }

    #[test]
    fn test_gaussian_sampler_moments() {
        let mut sampler = GaussianSampler::seeded(7);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| sampler.next_gaussian()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean drifted: {}", mean);
        assert!((var - 1.0).abs() < 0.1, "variance drifted: {}", var);
    }

    #[test]
    fn test_metric_dispatch() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((DistanceMetric::Cosine.distance(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!(
            (DistanceMetric::Euclidean.distance(&a, &b).unwrap() - 2f64.sqrt()).abs() < 1e-12
        );
        assert!((DistanceMetric::Manhattan.distance(&a, &b).unwrap() - 2.0).abs() < 1e-12);
    }
}
