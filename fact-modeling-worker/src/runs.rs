use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::LaunchError;
use crate::pipeline::PipelineEngine;

/// What distinguishes one logical trigger from another: the upstream batch
/// id for event triggers, a freshly minted id for manual ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discriminator {
    Batch(String),
    Manual(Uuid),
}

/// Identifies one pipeline execution. The launch timestamp is folded in so a
/// re-submitted trigger with the same discriminator still produces a
/// distinguishable run; callers needing true exactly-once semantics must
/// deduplicate upstream.
#[derive(Debug, Clone)]
pub struct RunIdentity {
    pub run_id: Uuid,
    pub bank_id: String,
    pub discriminator: Discriminator,
    pub data_location: Option<String>,
    pub launched_at: DateTime<Utc>,
}

impl RunIdentity {
    fn new(bank_id: String, discriminator: Discriminator, data_location: Option<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            bank_id,
            discriminator,
            data_location,
            launched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub read: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Lifecycle record for one run. Created at launch, transitioned only by
/// the engine, read by status queries.
#[derive(Debug, Clone)]
pub struct PipelineExecutionState {
    pub run: RunIdentity,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_detail: Option<String>,
    pub counts: RunCounts,
}

/// How many finished runs the registry keeps around for status queries.
/// Older terminal states are evicted when new runs come in; in-flight runs
/// are never evicted.
const RETAINED_TERMINAL_RUNS: usize = 1000;

/// In-process registry of execution states, shared between the launcher and
/// the engine tasks. Launches may race, hence the lock.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<Uuid, PipelineExecutionState>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn starting_state(run: &RunIdentity) -> PipelineExecutionState {
        PipelineExecutionState {
            run: run.clone(),
            status: RunStatus::Starting,
            started_at: Utc::now(),
            finished_at: None,
            exit_detail: None,
            counts: RunCounts::default(),
        }
    }

    pub(crate) fn insert_starting(&self, run: &RunIdentity) {
        let mut runs = self.runs.write().expect("poisoned run registry lock");
        Self::evict_finished(&mut runs);
        runs.insert(run.run_id, Self::starting_state(run));
    }

    /// Upsert: the launcher inserts a STARTING state before spawning, but the
    /// engine must be drivable on its own, so an unseen run is registered
    /// here rather than dropped.
    pub(crate) fn mark_running(&self, run: &RunIdentity) {
        let mut runs = self.runs.write().expect("poisoned run registry lock");
        Self::evict_finished(&mut runs);
        runs.entry(run.run_id)
            .or_insert_with(|| Self::starting_state(run))
            .status = RunStatus::Running;
    }

    /// Drop the oldest finished runs once the retention cap is exceeded.
    /// `finished_at` is only set on terminal states, so in-flight runs are
    /// never candidates.
    fn evict_finished(runs: &mut HashMap<Uuid, PipelineExecutionState>) {
        let mut finished: Vec<(Uuid, DateTime<Utc>)> = runs
            .iter()
            .filter_map(|(id, state)| state.finished_at.map(|at| (*id, at)))
            .collect();
        if finished.len() <= RETAINED_TERMINAL_RUNS {
            return;
        }
        finished.sort_by_key(|(_, at)| *at);
        for (id, _) in finished.drain(..finished.len() - RETAINED_TERMINAL_RUNS) {
            runs.remove(&id);
        }
    }

    pub(crate) fn mark_completed(&self, run_id: Uuid, counts: RunCounts) {
        self.update(run_id, |state| {
            state.status = RunStatus::Completed;
            state.finished_at = Some(Utc::now());
            state.counts = counts;
        });
    }

    pub(crate) fn mark_failed(&self, run_id: Uuid, counts: RunCounts, detail: String) {
        self.update(run_id, |state| {
            state.status = RunStatus::Failed;
            state.finished_at = Some(Utc::now());
            state.exit_detail = Some(detail);
            state.counts = counts;
        });
    }

    fn update(&self, run_id: Uuid, apply: impl FnOnce(&mut PipelineExecutionState)) {
        if let Some(state) = self
            .runs
            .write()
            .expect("poisoned run registry lock")
            .get_mut(&run_id)
        {
            apply(state);
        }
    }

    /// Status query; `None` is the NOT_FOUND indicator.
    pub fn status(&self, run_id: Uuid) -> Option<PipelineExecutionState> {
        self.runs
            .read()
            .expect("poisoned run registry lock")
            .get(&run_id)
            .cloned()
    }
}

/// What a caller supplies to start a run.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub bank_id: String,
    pub discriminator: Discriminator,
    pub data_location: Option<String>,
}

/// Builds a RunIdentity from trigger parameters and hands the run to the
/// engine on its own task, returning immediately with the identity.
pub struct Launcher {
    engine: Arc<PipelineEngine>,
    registry: RunRegistry,
}

impl Launcher {
    pub fn new(engine: Arc<PipelineEngine>, registry: RunRegistry) -> Self {
        Self { engine, registry }
    }

    pub fn launch(&self, request: LaunchRequest) -> Result<RunIdentity, LaunchError> {
        if request.bank_id.trim().is_empty() {
            return Err(LaunchError::EmptyBankId);
        }
        if matches!(&request.discriminator, Discriminator::Batch(batch) if batch.trim().is_empty())
        {
            return Err(LaunchError::EmptyBatchId);
        }

        let run = RunIdentity::new(
            request.bank_id,
            request.discriminator,
            request.data_location,
        );
        self.registry.insert_starting(&run);

        info!(
            run_id = %run.run_id,
            bank_id = %run.bank_id,
            discriminator = ?run.discriminator,
            "launching pipeline run"
        );
        metrics::counter!("modeling_runs_launched").increment(1);

        let engine = self.engine.clone();
        let handed_off = run.clone();
        tokio::spawn(async move { engine.execute(handed_off).await });

        Ok(run)
    }

    /// Manual trigger: mints a fresh discriminator so repeated manual starts
    /// for the same bank are independent runs.
    pub fn launch_manual(
        &self,
        bank_id: &str,
        data_location: Option<String>,
    ) -> Result<RunIdentity, LaunchError> {
        self.launch(LaunchRequest {
            bank_id: bank_id.to_owned(),
            discriminator: Discriminator::Manual(Uuid::now_v7()),
            data_location,
        })
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }
}
