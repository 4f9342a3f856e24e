//! Cluster finder: runs the clustering collaborator once and persists the
//! discovered clusters.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::clustering::ClusterSource;
use crate::domain::{Cluster, ClusteringOutcome, ExplorationParameters, ExplorationStatus};
use crate::error::Result;
use crate::store::ExplorationStore;

/// Discover clusters for one exploration and persist them.
///
/// Returns None when the exploration was stopped before or during the run;
/// the orchestrator then skips the remaining phases.
pub async fn run_cluster_finder(
    store: Arc<ExplorationStore>,
    source: Arc<dyn ClusterSource>,
    exploration_id: Uuid,
    parameters: ExplorationParameters,
) -> Result<Option<ClusteringOutcome>> {
    if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
        return Ok(None);
    }

    let outcome = source.discover(&parameters).await?;

    if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
        return Ok(None);
    }
    for candidate in &outcome.candidates {
        let cluster = Cluster::from_candidate(exploration_id, candidate.clone());
        store.insert_cluster(&cluster)?;
    }

    info!(
        %exploration_id,
        clusters_found = outcome.clusters_found,
        candidates = outcome.candidates.len(),
        "cluster finder finished"
    );
    Ok(Some(outcome))
}
