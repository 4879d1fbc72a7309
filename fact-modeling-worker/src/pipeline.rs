use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::cleanse::cleanse;
use crate::enrich::{enrich, EnrichError};
use crate::error::PipelineError;
use crate::identity::{IdentityResolver, IdentityStore};
use crate::notify::CompletionNotifier;
use crate::runs::{RunCounts, RunIdentity, RunRegistry};
use crate::sink::FactSink;
use crate::source::RecordSource;

/// Drives one run end to end: chunked extraction, cleanse + enrich per
/// record, transactional commit per chunk.
///
/// A run executes sequentially on its own task; concurrent runs share the
/// engine but nothing run-scoped (each run gets a fresh cursor and identity
/// cache). Record-level failures are counted and skipped; source, identity
/// store and chunk-commit failures end the run as Failed. Shutdown is
/// honored between chunks only, a chunk transaction is never interrupted.
pub struct PipelineEngine {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn FactSink>,
    identity: Arc<dyn IdentityStore>,
    notifier: Arc<dyn CompletionNotifier>,
    registry: RunRegistry,
    chunk_size: usize,
    shutdown: watch::Receiver<bool>,
}

impl PipelineEngine {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn FactSink>,
        identity: Arc<dyn IdentityStore>,
        notifier: Arc<dyn CompletionNotifier>,
        registry: RunRegistry,
        chunk_size: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            sink,
            identity,
            notifier,
            registry,
            chunk_size,
            shutdown,
        }
    }

    /// Run the chunk loop to a terminal state. Never returns an error: the
    /// outcome lands in the run registry and nothing run-level is allowed to
    /// escape the run's task.
    pub async fn execute(&self, run: RunIdentity) {
        self.registry.mark_running(&run);
        let mut counts = RunCounts::default();

        match self.run_chunks(&run, &mut counts).await {
            Ok(()) => {
                info!(
                    run_id = %run.run_id,
                    bank_id = %run.bank_id,
                    read = counts.read,
                    accepted = counts.accepted,
                    rejected = counts.rejected,
                    "pipeline run completed"
                );
                metrics::counter!("modeling_runs_completed").increment(1);
                self.registry.mark_completed(run.run_id, counts);
            }
            Err(e) => {
                error!(run_id = %run.run_id, bank_id = %run.bank_id, error = %e, "pipeline run failed");
                metrics::counter!("modeling_runs_failed").increment(1);
                self.registry.mark_failed(run.run_id, counts, e.to_string());
            }
        }

        if let Some(state) = self.registry.status(run.run_id) {
            // A notifier failure must not re-open a terminal run
            if let Err(e) = self.notifier.run_finished(&state).await {
                error!(run_id = %run.run_id, error = %e, "failed to publish completion event");
            }
        }
    }

    async fn run_chunks(
        &self,
        run: &RunIdentity,
        counts: &mut RunCounts,
    ) -> Result<(), PipelineError> {
        let mut cursor = self
            .source
            .open(&run.bank_id)
            .await
            .map_err(PipelineError::Source)?;

        // Fresh per run; see IdentityResolver for why
        let mut resolver = IdentityResolver::new(self.identity.clone());
        let mut chunk_index = 0usize;

        loop {
            if *self.shutdown.borrow() {
                return Err(PipelineError::Shutdown);
            }

            let raws = cursor
                .next_chunk(self.chunk_size)
                .await
                .map_err(PipelineError::Source)?;
            if raws.is_empty() {
                return Ok(());
            }

            let mut facts = Vec::with_capacity(raws.len());
            for raw in &raws {
                counts.read += 1;
                metrics::counter!("modeling_records_read").increment(1);

                let harmonized = match cleanse(raw) {
                    Ok(harmonized) => harmonized,
                    Err(_) => {
                        counts.rejected += 1;
                        metrics::counter!("modeling_records_rejected").increment(1);
                        continue;
                    }
                };

                match enrich(&mut resolver, &run.bank_id, harmonized).await {
                    Ok(fact) => facts.push(fact),
                    Err(EnrichError::Rejected(_)) => {
                        counts.rejected += 1;
                        metrics::counter!("modeling_records_rejected").increment(1);
                    }
                    Err(EnrichError::Store(e)) => return Err(PipelineError::Identity(e)),
                }
            }

            if !facts.is_empty() {
                self.sink
                    .write_chunk(&facts)
                    .await
                    .map_err(|e| PipelineError::ChunkCommit {
                        chunk: chunk_index,
                        source: e,
                    })?;
                metrics::counter!("modeling_chunks_committed").increment(1);
            }
            counts.accepted += facts.len() as u64;
            metrics::counter!("modeling_records_accepted").increment(facts.len() as u64);
            chunk_index += 1;
        }
    }
}
