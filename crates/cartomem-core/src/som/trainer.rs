//! Map trainer
//!
//! Drives the batch training loop: per-iteration schedules for learning
//! rate and radius, Fisher-Yates shuffling with an injected RNG, convergence
//! detection over a trailing quantization-error window, cooperative
//! cancellation, and progress reporting over a bounded channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::som::core::SomCore;
use crate::topology::NeighborhoodKernel;
use crate::vector::GaussianSampler;

// ============================================================================
// SCHEDULES
// ============================================================================

/// Decay curve for a scheduled parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Straight line from initial to final
    #[default]
    Linear,
    /// Geometric interpolation from initial to final
    Exponential,
    /// `v0 / (1 + c * t)`
    Inverse,
    /// Initial value halved every quarter of the run
    Step,
}

/// A scheduled scalar parameter (learning rate or radius)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSchedule {
    pub kind: ScheduleKind,
    pub initial: f64,
    #[serde(rename = "final")]
    pub final_value: f64,
    /// Decay coefficient for the inverse schedule
    pub inverse_coeff: f64,
}

impl ParamSchedule {
    /// Learning-rate schedule defaults (inverse coefficient 0.01)
    pub fn learning_rate(kind: ScheduleKind, initial: f64, final_value: f64) -> Self {
        Self {
            kind,
            initial,
            final_value,
            inverse_coeff: 0.01,
        }
    }

    /// Radius schedule defaults (inverse coefficient 0.02)
    pub fn radius(kind: ScheduleKind, initial: f64, final_value: f64) -> Self {
        Self {
            kind,
            initial,
            final_value,
            inverse_coeff: 0.02,
        }
    }

    /// Value at iteration `t` of a `total`-iteration run
    pub fn value_at(&self, t: usize, total: usize) -> f64 {
        let total = total.max(1);
        let p = t as f64 / total as f64;
        match self.kind {
            ScheduleKind::Linear => self.initial * (1.0 - p) + self.final_value * p,
            ScheduleKind::Exponential => {
                if self.initial <= 0.0 || self.final_value <= 0.0 {
                    // Geometric interpolation needs positive endpoints
                    return self.initial * (1.0 - p) + self.final_value * p;
                }
                self.initial * ((self.final_value / self.initial).ln() * p).exp()
            }
            ScheduleKind::Inverse => self.initial / (1.0 + self.inverse_coeff * t as f64),
            ScheduleKind::Step => {
                let quarter = (total / 4).max(1);
                self.initial * 0.5_f64.powi((t / quarter) as i32)
            }
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Training loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerConfig {
    /// Total iterations T
    pub iterations: usize,
    /// Samples per batch update
    pub batch_size: usize,
    /// Learning-rate schedule
    pub learning_rate: ParamSchedule,
    /// Neighborhood-radius schedule
    pub radius: ParamSchedule,
    /// Neighborhood kernel
    pub kernel: NeighborhoodKernel,
    /// Iterations between topographic-error checks
    pub quality_check_interval: usize,
    /// Iterations before convergence may be declared
    pub min_iterations: usize,
    /// Trailing window of quantization errors examined for convergence
    pub convergence_window: usize,
    /// Stddev below which the window counts as converged
    pub convergence_threshold: f64,
    /// Shuffle / init seed; None draws from entropy
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            iterations: 500,
            batch_size: 100,
            learning_rate: ParamSchedule::learning_rate(ScheduleKind::Linear, 0.1, 0.01),
            radius: ParamSchedule::radius(ScheduleKind::Linear, 2.5, 0.5),
            kernel: NeighborhoodKernel::Gaussian,
            quality_check_interval: 50,
            min_iterations: 100,
            convergence_window: 10,
            convergence_threshold: 1e-4,
            seed: None,
        }
    }
}

// ============================================================================
// TRACE / PROGRESS / CONTROL
// ============================================================================

/// One recorded training iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub iteration: usize,
    pub learning_rate: f64,
    pub radius: f64,
    pub quantization_error: f64,
    pub processing_time_ms: f64,
}

/// Progress event streamed during training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingProgress {
    pub iteration: usize,
    pub total_iterations: usize,
    pub learning_rate: f64,
    pub radius: f64,
    pub quantization_error: f64,
    pub topographic_error: Option<f64>,
}

/// Cooperative cancellation handle, shared with the caller.
///
/// The flag may be set from any thread; the trainer polls it once per
/// iteration and terminates cleanly, preserving the recorded trace.
#[derive(Debug, Clone, Default)]
pub struct TrainingControl {
    stop: Arc<AtomicBool>,
}

impl TrainingControl {
    /// Fresh, un-stopped control
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; takes effect at the next iteration boundary
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request so the handle can drive a resumed run
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingOutcome {
    pub iterations_run: usize,
    pub converged: bool,
    pub cancelled: bool,
    pub final_quantization_error: f64,
    pub final_topographic_error: Option<f64>,
    pub trace: Vec<TraceEntry>,
}

// ============================================================================
// TRAINER
// ============================================================================

/// Runs the batch training loop against a [`SomCore`]
#[derive(Debug, Clone)]
pub struct SomTrainer {
    config: TrainerConfig,
}

impl SomTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train `core` on `data`.
    ///
    /// Per iteration: shuffle a working copy, process it in batches (BMU
    /// search then accumulated update), record quantization error; every
    /// `quality_check_interval` iterations also compute topographic error.
    /// A `should_stop` callback (in addition to the shared control flag) is
    /// polled at each iteration boundary.
    pub fn train(
        &self,
        core: &mut SomCore,
        data: &[Vec<f64>],
        control: &TrainingControl,
        should_stop: Option<&(dyn Fn() -> bool + Send + Sync)>,
        progress: Option<&mpsc::Sender<TrainingProgress>>,
    ) -> Result<TrainingOutcome> {
        if data.is_empty() {
            return Err(CoreError::BadInput("training set is empty".into()));
        }
        for sample in data {
            if sample.len() != core.dim() {
                return Err(CoreError::DimensionMismatch {
                    expected: core.dim(),
                    got: sample.len(),
                });
            }
        }

        let trace_cap = self.config.iterations + 100;
        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut sampler = match self.config.seed {
            Some(seed) => GaussianSampler::seeded(seed),
            None => GaussianSampler::from_entropy(),
        };

        let mut working: Vec<Vec<f64>> = data.to_vec();
        let mut converged = false;
        let mut cancelled = false;
        let mut last_te: Option<f64> = None;
        let mut iterations_run = 0;

        for t in 0..self.config.iterations {
            if control.is_stopped() || should_stop.map(|f| f()).unwrap_or(false) {
                cancelled = true;
                debug!(iteration = t, "training stopped by caller");
                break;
            }

            let started = Instant::now();
            let alpha = self.config.learning_rate.value_at(t, self.config.iterations);
            let radius = self.config.radius.value_at(t, self.config.iterations);

            working.shuffle(sampler.rng());

            // One pass over the shuffled data in batches; the per-sample BMU
            // distances double as this iteration's quantization error.
            let mut distance_sum = 0.0;
            for batch in working.chunks(self.config.batch_size.max(1)) {
                let bmus = core.find_bmus_batch(batch)?;
                distance_sum += bmus.iter().map(|(_, d)| d).sum::<f64>();
                let indices: Vec<usize> = bmus.iter().map(|(i, _)| *i).collect();
                core.batch_update(batch, &indices, alpha, radius, self.config.kernel)?;
            }
            let qe = distance_sum / working.len() as f64;

            if self.config.quality_check_interval > 0
                && (t + 1) % self.config.quality_check_interval == 0
            {
                last_te = Some(core.topographic_error(data)?);
            }

            if trace.len() < trace_cap {
                trace.push(TraceEntry {
                    iteration: t,
                    learning_rate: alpha,
                    radius,
                    quantization_error: qe,
                    processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                });
            }
            iterations_run = t + 1;

            if let Some(tx) = progress {
                // Never block the loop on a slow consumer
                let _ = tx.try_send(TrainingProgress {
                    iteration: t,
                    total_iterations: self.config.iterations,
                    learning_rate: alpha,
                    radius,
                    quantization_error: qe,
                    topographic_error: last_te,
                });
            }

            if t + 1 >= self.config.min_iterations
                && self.window_converged(&trace)
            {
                converged = true;
                debug!(iteration = t, qe, "training converged");
                break;
            }
        }

        let final_qe = trace.last().map(|e| e.quantization_error).unwrap_or(0.0);
        Ok(TrainingOutcome {
            iterations_run,
            converged,
            cancelled,
            final_quantization_error: final_qe,
            final_topographic_error: last_te,
            trace,
        })
    }

    /// Stddev of the trailing quantization-error window vs. threshold
    fn window_converged(&self, trace: &[TraceEntry]) -> bool {
        let w = self.config.convergence_window;
        if w == 0 || trace.len() < w {
            return false;
        }
        let window = &trace[trace.len() - w..];
        let mean = window.iter().map(|e| e.quantization_error).sum::<f64>() / w as f64;
        let var = window
            .iter()
            .map(|e| {
                let d = e.quantization_error - mean;
                d * d
            })
            .sum::<f64>()
            / w as f64;
        var.sqrt() < self.config.convergence_threshold
    }
}

// ============================================================================
// TESTS
// ============================================================================
