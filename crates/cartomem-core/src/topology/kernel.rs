//! Neighborhood kernels
//!
//! Map a grid distance `d` and a neighborhood radius `r` to an update
//! strength in [0, 1] (Mexican-hat may go negative inside its inhibition
//! ring). Used by the batch update to spread each sample's influence.

use serde::{Deserialize, Serialize};

/// Kernel influence below this is treated as zero by the batch update
pub const KERNEL_EPSILON: f64 = 1e-6;

/// Neighborhood influence function `k(d, r)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NeighborhoodKernel {
    /// `exp(-d^2 / (2 sigma^2))`, sigma = r/3
    #[default]
    Gaussian,
    /// Ricker wavelet: excitation center, inhibition ring
    MexicanHat,
    /// 1 within the radius, 0 outside
    Bubble,
    /// `max(0, 1 - d/r)`
    Linear,
}

impl NeighborhoodKernel {
    /// Evaluate the kernel at grid distance `d` with radius `r`.
    ///
    /// Degenerate radius (`r <= 0`) collapses the neighborhood to the BMU
    /// itself: returns 1 iff `d == 0`.
    pub fn evaluate(&self, d: f64, r: f64) -> f64 {
        if r <= 0.0 {
            return if d == 0.0 { 1.0 } else { 0.0 };
        }

        match self {
            NeighborhoodKernel::Gaussian => {
                let sigma = r / 3.0;
                (-d * d / (2.0 * sigma * sigma)).exp()
            }
            NeighborhoodKernel::MexicanHat => {
                let sigma = r / 3.0;
                let ratio = (d / sigma) * (d / sigma);
                let norm = 2.0 / (3.0_f64.sqrt() * sigma.sqrt() * std::f64::consts::PI.powf(0.25));
                norm * (1.0 - ratio) * (-ratio / 2.0).exp()
            }
            NeighborhoodKernel::Bubble => {
                if d <= r {
                    1.0
                } else {
                    0.0
                }
            }
            NeighborhoodKernel::Linear => (1.0 - d / r).max(0.0),
        }
    }

    /// Parse from a lowercase name, falling back to Gaussian
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gaussian" => NeighborhoodKernel::Gaussian,
            "mexican_hat" | "mexicanhat" | "mexican-hat" => NeighborhoodKernel::MexicanHat,
            "bubble" => NeighborhoodKernel::Bubble,
            "linear" => NeighborhoodKernel::Linear,
            _ => NeighborhoodKernel::Gaussian,
        }
    }
}

impl std::fmt::Display for NeighborhoodKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NeighborhoodKernel::Gaussian => "gaussian",
            NeighborhoodKernel::MexicanHat => "mexican_hat",
            NeighborhoodKernel::Bubble => "bubble",
            NeighborhoodKernel::Linear => "linear",
        };
        write!(f, "{}", name)
    }
}
