//! Input generator: one pending simulation per discovered cluster, with both
//! optimizer inputs synthesized and written atomically.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{ClusteringOutcome, ExplorationStatus, Simulation};
use crate::error::Result;
use crate::inputs::InputSynthesizer;
use crate::store::ExplorationStore;

/// Generate optimizer inputs for every cluster of the exploration.
///
/// Writes clusters_found/minigrids_found once, before the per-cluster loop,
/// then creates one PENDING simulation per cluster. A duplicate cluster id
/// surfaces as a ConstraintViolation and fails the phase: it means the
/// clustering output broke the one-simulation-per-cluster invariant.
pub async fn run_input_generator(
    store: Arc<ExplorationStore>,
    synthesizer: Arc<dyn InputSynthesizer>,
    exploration_id: Uuid,
    outcome: ClusteringOutcome,
) -> Result<()> {
    let clusters = store.list_clusters(exploration_id)?;
    store.set_discovery_counts(
        exploration_id,
        outcome.clusters_found,
        clusters.len() as i64,
    )?;

    for cluster in &clusters {
        if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
            debug!(%exploration_id, "stop observed, input generation abandoned");
            return Ok(());
        }

        let (grid_input, supply_input) = synthesizer.generate(cluster).await?;
        let simulation = Simulation::new(
            exploration_id,
            cluster.cluster_id,
            grid_input.to_payload()?.to_string(),
            supply_input.to_payload()?.to_string(),
        );
        store.create_simulation(&simulation)?;
        debug!(
            %exploration_id,
            cluster_id = cluster.cluster_id,
            simulation_id = %simulation.id,
            "simulation created"
        );
    }

    info!(%exploration_id, simulations = clusters.len(), "input generation finished");
    Ok(())
}
