//! Instance registry - the logical control surface over map engines
//!
//! One registry per process owns every live map instance. Training runs on
//! a blocking thread holding the instance's write lock for the duration of
//! the run; status and cancellation go through side channels so they never
//! contend with the trainer. There is exactly one id scheme (UUID v4) and
//! one state machine (the engine's).

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::record::{Record, RecordDraft};
use crate::som::core::Cluster;
use crate::som::engine::{
    EngineState, FeatureMapKind, GridState, LoadReport, MapExport, NodeMapping, VsomConfig,
    VsomEngine, DEFAULT_MIN_CLUSTER_SIZE,
};
use crate::som::trainer::{TrainerConfig, TrainingControl, TrainingProgress};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default ceiling on simultaneously live instances
pub const DEFAULT_MAX_INSTANCES: usize = 5;

/// Registry limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    pub max_instances: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_instances: DEFAULT_MAX_INSTANCES,
        }
    }
}

// ============================================================================
// VIEWS
// ============================================================================

/// Summary row for `list_instances`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_id: String,
    pub state: EngineState,
    pub map_width: usize,
    pub map_height: usize,
    pub embedding_dim: usize,
    pub created_at: DateTime<Utc>,
}

/// Live training numbers for `training_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStatusView {
    pub instance_id: String,
    pub state: EngineState,
    pub iteration: usize,
    pub total_iterations: usize,
    pub quantization_error: f64,
}

#[derive(Debug, Clone)]
struct StatusSnapshot {
    state: EngineState,
    iteration: usize,
    total_iterations: usize,
    quantization_error: f64,
    loaded_records: usize,
}

struct InstanceSlot {
    engine: Arc<RwLock<VsomEngine>>,
    control: TrainingControl,
    status: Arc<StdRwLock<StatusSnapshot>>,
    config: VsomConfig,
    created_at: DateTime<Utc>,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Owns and serializes access to every live map instance
pub struct VsomRegistry {
    config: RegistryConfig,
    instances: RwLock<HashMap<String, Arc<InstanceSlot>>>,
}

impl VsomRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            instances: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, instance_id: &str) -> Result<Arc<InstanceSlot>> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| CoreError::BadInput(format!("unknown instance: {}", instance_id)))
    }

    /// Create a new instance. Fails when the instance ceiling is reached.
    pub async fn create(&self, config: VsomConfig) -> Result<InstanceInfo> {
        let mut instances = self.instances.write().await;
        if instances.len() >= self.config.max_instances {
            return Err(CoreError::BadInput(format!(
                "instance limit reached ({})",
                self.config.max_instances
            )));
        }

        let engine = VsomEngine::create(config.clone())?;
        let config = engine.config().clone();
        let control = engine.control();
        let instance_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let slot = Arc::new(InstanceSlot {
            engine: Arc::new(RwLock::new(engine)),
            control,
            status: Arc::new(StdRwLock::new(StatusSnapshot {
                state: EngineState::Created,
                iteration: 0,
                total_iterations: 0,
                quantization_error: 0.0,
                loaded_records: 0,
            })),
            config: config.clone(),
            created_at,
        });
        instances.insert(instance_id.clone(), slot);
        info!(instance_id = %instance_id, "created map instance");

        Ok(InstanceInfo {
            instance_id,
            state: EngineState::Created,
            map_width: config.map_width,
            map_height: config.map_height,
            embedding_dim: config.embedding_dim,
            created_at,
        })
    }

    /// Normalize drafts and load them into an instance
    pub async fn load_data(&self, instance_id: &str, drafts: Vec<RecordDraft>) -> Result<LoadReport> {
        let now = Utc::now();
        let records: Vec<Record> = drafts
            .into_iter()
            .map(|d| d.into_record(now))
            .collect::<Result<_>>()?;
        self.load_records(instance_id, &records).await
    }

    /// Load canonical records into an instance
    pub async fn load_records(&self, instance_id: &str, records: &[Record]) -> Result<LoadReport> {
        let slot = self.slot(instance_id).await?;
        let mut engine = slot
            .engine
            .try_write()
            .map_err(|_| training_in_progress())?;
        let report = engine.load(records)?;
        let mut status = slot.status.write().unwrap();
        status.state = engine.state();
        status.loaded_records = engine.loaded_records();
        Ok(report)
    }

    /// Start a training run and stream its progress.
    ///
    /// Training owns the instance's write lock until it finishes; status
    /// and stop requests flow through side channels. The returned receiver
    /// may be dropped freely - the run continues and the status snapshot
    /// keeps updating.
    pub async fn train(
        &self,
        instance_id: &str,
        opts: TrainerConfig,
    ) -> Result<mpsc::Receiver<TrainingProgress>> {
        let slot = self.slot(instance_id).await?;
        let mut guard = slot
            .engine
            .clone()
            .try_write_owned()
            .map_err(|_| training_in_progress())?;

        let state = guard.state();
        if !matches!(
            state,
            EngineState::DataLoaded | EngineState::TrainingStopped
        ) {
            return Err(CoreError::NotReady {
                expected: "data_loaded|training_stopped (for train)".into(),
                actual: state.to_string(),
            });
        }

        let (inner_tx, mut inner_rx) = mpsc::channel::<TrainingProgress>(256);
        let (outer_tx, outer_rx) = mpsc::channel::<TrainingProgress>(256);

        {
            let mut status = slot.status.write().unwrap();
            status.state = EngineState::Training;
            status.total_iterations = opts.iterations;
        }

        // Forward progress into the status snapshot and out to the caller
        let status = Arc::clone(&slot.status);
        tokio::spawn(async move {
            while let Some(event) = inner_rx.recv().await {
                {
                    let mut s = status.write().unwrap();
                    s.iteration = event.iteration;
                    s.quantization_error = event.quantization_error;
                }
                let _ = outer_tx.try_send(event);
            }
        });

        let status = Arc::clone(&slot.status);
        tokio::spawn(async move {
            let joined = tokio::task::spawn_blocking(move || {
                let outcome = guard.train(opts, Some(&inner_tx));
                (guard, outcome)
            })
            .await;

            match joined {
                Ok((guard, outcome)) => {
                    // Release the instance before publishing the new state,
                    // so a reader seeing "not training" can always lock it
                    let final_state = guard.state();
                    drop(guard);
                    let mut s = status.write().unwrap();
                    s.state = final_state;
                    if let Ok(outcome) = &outcome {
                        s.iteration = outcome.iterations_run;
                        s.quantization_error = outcome.final_quantization_error;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "training task panicked");
                    status.write().unwrap().state = EngineState::Error;
                }
            }
        });

        Ok(outer_rx)
    }

    /// Request cancellation of a running training; returns immediately
    pub async fn stop_training(&self, instance_id: &str) -> Result<()> {
        let slot = self.slot(instance_id).await?;
        slot.control.stop();
        Ok(())
    }

    /// Grid snapshot. During training (lock held by the trainer) a
    /// weight-less snapshot is served from the cached status.
    pub async fn grid_state(&self, instance_id: &str, include_weights: bool) -> Result<GridState> {
        let slot = self.slot(instance_id).await?;
        let result = match slot.engine.try_read() {
            Ok(engine) => engine.grid_state(include_weights),
            Err(_) => {
                let status = slot.status.read().unwrap();
                GridState {
                    width: slot.config.map_width,
                    height: slot.config.map_height,
                    shape: slot.config.shape,
                    boundary: slot.config.boundary,
                    state: status.state,
                    embedding_dim: slot.config.embedding_dim,
                    loaded_records: status.loaded_records,
                    weights: None,
                }
            }
        };
        Ok(result)
    }

    /// Feature map of a trained instance
    pub async fn feature_maps(&self, instance_id: &str, kind: FeatureMapKind) -> Result<Vec<f64>> {
        let slot = self.slot(instance_id).await?;
        let engine = slot.engine.try_read().map_err(|_| training_in_progress())?;
        engine.feature_map(kind)
    }

    /// Cluster extraction on a trained instance
    pub async fn cluster(
        &self,
        instance_id: &str,
        threshold: f64,
        min_cluster_size: Option<usize>,
    ) -> Result<Vec<Cluster>> {
        let slot = self.slot(instance_id).await?;
        let engine = slot.engine.try_read().map_err(|_| training_in_progress())?;
        engine.clusters(
            threshold,
            min_cluster_size.unwrap_or(DEFAULT_MIN_CLUSTER_SIZE),
        )
    }

    /// Per-record BMU assignments of a trained instance
    pub async fn node_mappings(&self, instance_id: &str) -> Result<Vec<NodeMapping>> {
        let slot = self.slot(instance_id).await?;
        let engine = slot.engine.try_read().map_err(|_| training_in_progress())?;
        engine.node_mappings()
    }

    /// Structured export of a trained instance
    pub async fn export(
        &self,
        instance_id: &str,
        dataset: &str,
        cluster_threshold: f64,
    ) -> Result<MapExport> {
        let slot = self.slot(instance_id).await?;
        let engine = slot.engine.try_read().map_err(|_| training_in_progress())?;
        engine.export(dataset, cluster_threshold)
    }

    /// Delete an instance. A running training is cancelled first; delete
    /// waits for it to release the instance before removing it.
    pub async fn delete(&self, instance_id: &str) -> Result<()> {
        let slot = {
            let mut instances = self.instances.write().await;
            instances
                .remove(instance_id)
                .ok_or_else(|| CoreError::BadInput(format!("unknown instance: {}", instance_id)))?
        };

        slot.control.stop();
        let mut engine = slot.engine.write().await;
        engine.delete()?;
        slot.status.write().unwrap().state = EngineState::Deleted;
        info!(instance_id = %instance_id, "deleted map instance");
        Ok(())
    }

    /// Summaries of all live instances
    pub async fn list_instances(&self) -> Vec<InstanceInfo> {
        let instances = self.instances.read().await;
        let mut out: Vec<InstanceInfo> = instances
            .iter()
            .map(|(id, slot)| {
                let status = slot.status.read().unwrap();
                InstanceInfo {
                    instance_id: id.clone(),
                    state: status.state,
                    map_width: slot.config.map_width,
                    map_height: slot.config.map_height,
                    embedding_dim: slot.config.embedding_dim,
                    created_at: slot.created_at,
                }
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Training status for one instance, or all when `instance_id` is None
    pub async fn training_status(
        &self,
        instance_id: Option<&str>,
    ) -> Result<Vec<TrainingStatusView>> {
        let view = |id: &str, slot: &InstanceSlot| {
            let status = slot.status.read().unwrap();
            TrainingStatusView {
                instance_id: id.to_string(),
                state: status.state,
                iteration: status.iteration,
                total_iterations: status.total_iterations,
                quantization_error: status.quantization_error,
            }
        };

        match instance_id {
            Some(id) => {
                let slot = self.slot(id).await?;
                Ok(vec![view(id, &slot)])
            }
            None => {
                let instances = self.instances.read().await;
                Ok(instances.iter().map(|(id, slot)| view(id, slot)).collect())
            }
        }
    }
}

impl Default for VsomRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn training_in_progress() -> CoreError {
    CoreError::NotReady {
        expected: "idle instance".into(),
        actual: "training".into(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
