//! SOM weight matrix and numeric kernels
//!
//! Batched best-matching-unit search, accumulator-based batch updates, and
//! the two map quality metrics (quantization and topographic error). These
//! loops are CPU-bound and synchronous; the batch dimension is parallelized
//! with rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::topology::{GridTopology, NeighborhoodKernel, KERNEL_EPSILON};
use crate::vector::{cosine_similarity, DistanceMetric, GaussianSampler};

/// A contiguous grid region of mutually similar nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Seed node index
    pub id: usize,
    pub members: Vec<usize>,
    pub centroid: Vec<f64>,
}

// ============================================================================
// WEIGHT INITIALIZATION
// ============================================================================

/// Weight initialization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightInit {
    /// Small Gaussian noise (stddev 0.1)
    #[default]
    Random,
    /// Positional interpolation in [-0.05, 0.05]
    Linear,
    /// Principal-component initialization. Declared but not implemented;
    /// fails loudly instead of silently degrading to random.
    Pca,
}

// ============================================================================
// SOM CORE
// ============================================================================

/// The weight matrix of a map plus the kernels that operate on it
#[derive(Debug, Clone)]
pub struct SomCore {
    topology: GridTopology,
    dim: usize,
    metric: DistanceMetric,
    weights: Vec<Vec<f64>>,
}

impl SomCore {
    /// Create an uninitialized core (all-zero weights) for the given grid
    pub fn new(topology: GridTopology, dim: usize, metric: DistanceMetric) -> Self {
        let total = topology.total_nodes();
        Self {
            topology,
            dim,
            metric,
            weights: vec![vec![0.0; dim]; total],
        }
    }

    /// Embedding dimension of every node weight
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Distance metric used for BMU search
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Grid underneath the weights
    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    /// All node weights, row per node
    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    /// Weight vector of one node
    pub fn node_weight(&self, index: usize) -> Option<&[f64]> {
        self.weights.get(index).map(|w| w.as_slice())
    }

    /// Replace the full weight matrix (map import, tests)
    pub fn set_weights(&mut self, weights: Vec<Vec<f64>>) -> Result<()> {
        if weights.len() != self.topology.total_nodes() {
            return Err(CoreError::BadInput(format!(
                "expected {} weight rows, got {}",
                self.topology.total_nodes(),
                weights.len()
            )));
        }
        for row in &weights {
            if row.len() != self.dim {
                return Err(CoreError::DimensionMismatch {
                    expected: self.dim,
                    got: row.len(),
                });
            }
        }
        self.weights = weights;
        Ok(())
    }

    /// Initialize the weight matrix
    pub fn init_weights(&mut self, method: WeightInit, sampler: &mut GaussianSampler) -> Result<()> {
        let total = self.topology.total_nodes();
        match method {
            WeightInit::Random => {
                for row in self.weights.iter_mut() {
                    for w in row.iter_mut() {
                        *w = sampler.next_gaussian() * 0.1;
                    }
                }
            }
            WeightInit::Linear => {
                // Interpolate each component across node position and
                // component position so the map starts as a smooth ramp.
                let node_span = (total.max(2) - 1) as f64;
                let comp_span = (self.dim.max(2) - 1) as f64;
                for (i, row) in self.weights.iter_mut().enumerate() {
                    let p = i as f64 / node_span;
                    for (j, w) in row.iter_mut().enumerate() {
                        let q = j as f64 / comp_span;
                        *w = -0.05 + 0.1 * (p + q) / 2.0;
                    }
                }
            }
            WeightInit::Pca => {
                return Err(CoreError::NotImplemented("pca weight initialization"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // BMU search
    // ------------------------------------------------------------------

    /// Best matching unit for one input: `(node_index, distance)`.
    /// Ties break to the lowest index.
    pub fn find_bmu(&self, input: &[f64]) -> Result<(usize, f64)> {
        self.check_input(input)?;

        let mut best = (0usize, f64::INFINITY);
        for (i, w) in self.weights.iter().enumerate() {
            let d = self.metric.distance(input, w)?;
            if d < best.1 {
                best = (i, d);
            }
        }
        Ok(best)
    }

    /// Best and second-best matching units for one input
    pub fn find_bmu2(&self, input: &[f64]) -> Result<((usize, f64), (usize, f64))> {
        self.check_input(input)?;

        let mut first = (0usize, f64::INFINITY);
        let mut second = (0usize, f64::INFINITY);
        for (i, w) in self.weights.iter().enumerate() {
            let d = self.metric.distance(input, w)?;
            if d < first.1 {
                second = first;
                first = (i, d);
            } else if d < second.1 {
                second = (i, d);
            }
        }
        Ok((first, second))
    }

    /// BMUs for a whole batch, parallel over the batch dimension
    pub fn find_bmus_batch(&self, inputs: &[Vec<f64>]) -> Result<Vec<(usize, f64)>> {
        for input in inputs {
            self.check_input(input)?;
        }
        inputs
            .par_iter()
            .map(|input| self.find_bmu(input))
            .collect()
    }

    // ------------------------------------------------------------------
    // Batch update
    // ------------------------------------------------------------------

    /// Apply one accumulated batch update.
    ///
    /// Per sample, every node whose kernel influence exceeds
    /// [`KERNEL_EPSILON`] accumulates `alpha * k * (x - w)`; after the whole
    /// batch, each touched node moves by its mean accumulated delta. The
    /// averaging happens after the batch, never online.
    pub fn batch_update(
        &mut self,
        inputs: &[Vec<f64>],
        bmus: &[usize],
        alpha: f64,
        radius: f64,
        kernel: NeighborhoodKernel,
    ) -> Result<()> {
        if inputs.len() != bmus.len() {
            return Err(CoreError::BadInput(format!(
                "batch size mismatch: {} inputs, {} bmus",
                inputs.len(),
                bmus.len()
            )));
        }

        let total = self.topology.total_nodes();
        let mut deltas = vec![vec![0.0_f64; self.dim]; total];
        let mut counts = vec![0usize; total];
        let reach = kernel_support_radius(kernel, radius);

        for (input, &bmu) in inputs.iter().zip(bmus.iter()) {
            self.check_input(input)?;
            if bmu >= total {
                return Err(CoreError::BadInput(format!(
                    "bmu index {} out of range for {} nodes",
                    bmu, total
                )));
            }

            for &node in self.topology.neighbors_within(bmu, reach).iter() {
                let d = self.topology.grid_distance(bmu, node);
                let k = kernel.evaluate(d, radius);
                if k.abs() <= KERNEL_EPSILON {
                    continue;
                }
                let w = &self.weights[node];
                let delta = &mut deltas[node];
                for j in 0..self.dim {
                    delta[j] += alpha * k * (input[j] - w[j]);
                }
                counts[node] += 1;
            }
        }

        for (node, count) in counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let scale = 1.0 / *count as f64;
            let w = &mut self.weights[node];
            for j in 0..self.dim {
                w[j] += deltas[node][j] * scale;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Quality metrics
    // ------------------------------------------------------------------

    /// Mean BMU distance over a dataset
    pub fn quantization_error(&self, inputs: &[Vec<f64>]) -> Result<f64> {
        if inputs.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = self
            .find_bmus_batch(inputs)?
            .iter()
            .map(|(_, d)| d)
            .sum();
        Ok(total / inputs.len() as f64)
    }

    /// Fraction of inputs whose best and second-best units are not
    /// grid-adjacent (threshold is per-topology)
    pub fn topographic_error(&self, inputs: &[Vec<f64>]) -> Result<f64> {
        if inputs.is_empty() {
            return Ok(0.0);
        }
        let threshold = self.topology.adjacency_threshold();
        let broken: usize = inputs
            .par_iter()
            .map(|input| {
                let ((b1, _), (b2, _)) = self.find_bmu2(input)?;
                Ok(usize::from(self.topology.grid_distance(b1, b2) > threshold))
            })
            .collect::<Result<Vec<usize>>>()?
            .into_iter()
            .sum();
        Ok(broken as f64 / inputs.len() as f64)
    }

    // ------------------------------------------------------------------
    // Cluster extraction
    // ------------------------------------------------------------------

    /// Extract clusters by region-growing on weight similarity.
    ///
    /// BFS from each unvisited node to grid-adjacent nodes whose weight
    /// cosine similarity to the frontier node meets `threshold`. Regions
    /// smaller than `min_cluster_size` are discarded. Deterministic in node
    /// order, so input ordering cannot change the result.
    pub fn extract_clusters(&self, threshold: f64, min_cluster_size: usize) -> Result<Vec<Cluster>> {
        let total = self.topology.total_nodes();
        let mut visited = vec![false; total];
        let mut clusters = Vec::new();

        for seed in 0..total {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut members = vec![seed];
            let mut queue = std::collections::VecDeque::from([seed]);

            while let Some(node) = queue.pop_front() {
                for neighbor in self.topology.adjacent(node) {
                    if visited[neighbor] {
                        continue;
                    }
                    let sim = cosine_similarity(&self.weights[node], &self.weights[neighbor])?;
                    if sim >= threshold {
                        visited[neighbor] = true;
                        members.push(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }

            if members.len() < min_cluster_size.max(1) {
                continue;
            }
            members.sort_unstable();

            let mut centroid = vec![0.0; self.dim];
            for &m in &members {
                for (c, w) in centroid.iter_mut().zip(self.weights[m].iter()) {
                    *c += w;
                }
            }
            let scale = 1.0 / members.len() as f64;
            for c in centroid.iter_mut() {
                *c *= scale;
            }

            clusters.push(Cluster {
                id: seed,
                members,
                centroid,
            });
        }

        Ok(clusters)
    }

    fn check_input(&self, input: &[f64]) -> Result<()> {
        if input.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim,
                got: input.len(),
            });
        }
        Ok(())
    }
}

/// Grid radius past which a kernel's influence is below [`KERNEL_EPSILON`].
///
/// Gaussian-family kernels tail off smoothly (at `2r` the Gaussian is
/// `exp(-18)`), compact kernels cut off exactly at `r`.
fn kernel_support_radius(kernel: NeighborhoodKernel, radius: f64) -> f64 {
    match kernel {
        NeighborhoodKernel::Gaussian | NeighborhoodKernel::MexicanHat => radius * 2.0,
        NeighborhoodKernel::Bubble | NeighborhoodKernel::Linear => radius,
    }
}

// ============================================================================
// TESTS
// ============================================================================
