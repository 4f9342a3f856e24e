//! Exploration orchestrator: sequences the four workers and drives the
//! Exploration entity through its state machine.
//!
//! Cluster discovery runs to completion first; input generation, the
//! scheduler and the result processor then run concurrently and are joined
//! in that order, each join stamping the corresponding phase timestamp. The
//! orchestrator never interrupts a worker: a failed phase flips the stop
//! flag so the remaining workers drain cooperatively, and only after all
//! joins does the exploration receive its terminal status.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::clustering::ClusterSource;
use crate::config::EngineConfig;
use crate::domain::{ExplorationParameters, ExplorationStatus, SimulationStatus};
use crate::error::{ExploreError, Result};
use crate::gateway::Optimizer;
use crate::inputs::InputSynthesizer;
use crate::results::ResultsSummarizer;
use crate::store::ExplorationStore;
use crate::store::Phase;
use crate::workers::{
    run_cluster_finder, run_input_generator, run_result_processor, run_scheduler,
};

/// The external collaborators of one exploration run
#[derive(Clone)]
pub struct Collaborators {
    pub cluster_source: Arc<dyn ClusterSource>,
    pub input_synthesizer: Arc<dyn InputSynthesizer>,
    pub optimizer: Arc<dyn Optimizer>,
    pub summarizer: Arc<dyn ResultsSummarizer>,
}

/// Stamp a phase timestamp, unless the run already left RUNNING: a stopped
/// exploration's workers return early, so the phase did not actually complete
fn stamp_if_running(store: &ExplorationStore, id: Uuid, phase: Phase) -> Result<()> {
    if store.exploration_status(id)? == ExplorationStatus::Running {
        store.stamp_phase(id, phase)?;
    }
    Ok(())
}

/// Join one worker, folding panics into a failed phase
async fn join_phase(phase: &'static str, handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(ExploreError::PhaseFailed {
            phase,
            message: format!("worker task aborted: {e}"),
        }),
    }
}

/// Flip the stop flag (if the run is still RUNNING) so the remaining workers
/// drain, then wait for them
async fn drain_after_failure(
    store: &ExplorationStore,
    exploration_id: Uuid,
    remaining: Vec<(&'static str, JoinHandle<Result<()>>)>,
) {
    // A Conflict here just means the run already left RUNNING
    if let Err(e @ ExploreError::Storage(_)) = store.request_stop(exploration_id) {
        error!(%exploration_id, error = %e, "could not flag the exploration for draining");
    }
    for (phase, handle) in remaining {
        if let Err(e) = join_phase(phase, handle).await {
            error!(%exploration_id, phase, error = %e, "worker failed while draining");
        }
    }
}

/// Run one exploration end to end.
///
/// On return the exploration has reached a terminal status: FINISHED or
/// ERROR set here, or STOPPED set by a caller's stop request and left
/// untouched.
pub async fn run_exploration(
    store: Arc<ExplorationStore>,
    config: Arc<EngineConfig>,
    collaborators: Collaborators,
    exploration_id: Uuid,
    parameters: ExplorationParameters,
) -> Result<()> {
    info!(%exploration_id, "exploration started");

    // Phase 1, blocking: cluster discovery
    let outcome = match run_cluster_finder(
        store.clone(),
        collaborators.cluster_source.clone(),
        exploration_id,
        parameters,
    )
    .await
    {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            info!(%exploration_id, "exploration stopped during cluster discovery");
            return Ok(());
        }
        Err(e) => {
            error!(%exploration_id, error = %e, "cluster discovery failed");
            store.mark_error(exploration_id)?;
            return Err(e);
        }
    };
    stamp_if_running(&store, exploration_id, Phase::ClustersFound)?;

    // Phases 2-4 run concurrently
    let inputs_handle = tokio::spawn(run_input_generator(
        store.clone(),
        collaborators.input_synthesizer.clone(),
        exploration_id,
        outcome,
    ));
    let scheduler_handle = tokio::spawn(run_scheduler(
        store.clone(),
        collaborators.optimizer.clone(),
        config.clone(),
        exploration_id,
    ));
    let processor_handle = tokio::spawn(run_result_processor(
        store.clone(),
        collaborators.summarizer.clone(),
        config.clone(),
        exploration_id,
    ));

    if let Err(e) = join_phase("input-generator", inputs_handle).await {
        error!(%exploration_id, error = %e, "input generation failed");
        drain_after_failure(
            &store,
            exploration_id,
            vec![
                ("scheduler", scheduler_handle),
                ("result-processor", processor_handle),
            ],
        )
        .await;
        store.mark_error(exploration_id)?;
        return Err(e);
    }
    stamp_if_running(&store, exploration_id, Phase::InputsGenerated)?;

    if let Err(e) = join_phase("scheduler", scheduler_handle).await {
        error!(%exploration_id, error = %e, "optimization scheduling failed");
        drain_after_failure(
            &store,
            exploration_id,
            vec![("result-processor", processor_handle)],
        )
        .await;
        store.mark_error(exploration_id)?;
        return Err(e);
    }
    stamp_if_running(&store, exploration_id, Phase::OptimizerFinished)?;

    if let Err(e) = join_phase("result-processor", processor_handle).await {
        error!(%exploration_id, error = %e, "result processing failed");
        store.mark_error(exploration_id)?;
        return Err(e);
    }

    // Terminal status: ERROR iff every simulation ended PROCESSED_ERROR,
    // which includes the vacuous zero-simulation case. The guarded write
    // leaves a STOPPED exploration untouched.
    let simulations = store.all_simulations(exploration_id)?;
    let all_failed = simulations
        .iter()
        .all(|s| s.status == SimulationStatus::ProcessedError);
    let final_status = if all_failed {
        ExplorationStatus::Error
    } else {
        ExplorationStatus::Finished
    };
    let written = store.finalize(exploration_id, final_status)?;
    info!(
        %exploration_id,
        status = if written { final_status.as_str() } else { "STOPPED" },
        simulations = simulations.len(),
        "exploration finished"
    );
    Ok(())
}
