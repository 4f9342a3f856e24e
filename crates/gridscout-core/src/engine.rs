//! Public engine facade: start, stop and observe explorations.
//!
//! `ExplorationEngine` is the only entry point callers need. Starting an
//! exploration validates parameters, wipes the candidates of the previous
//! run and spawns the orchestrator as a detached task; progress and detail
//! queries read the store only and work for live and finished runs alike.

use std::sync::Arc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{
    now_ms, Cluster, ExplorationParameters, ExplorationStatus, Simulation, SimulationStatus,
};
use crate::error::{ExploreError, Result};
use crate::orchestrator::{run_exploration, Collaborators};
use crate::store::ExplorationStore;

/// Duration estimate per still-unanalyzed minigrid, in milliseconds
const ESTIMATE_PER_MINIGRID_MS: i64 = 180_000;

/// Progress snapshot of one exploration
#[derive(Debug, Clone, Serialize)]
pub struct ExplorationProgress {
    pub exploration_id: Uuid,
    pub status: ExplorationStatus,
    pub started_at: i64,

    /// Milliseconds elapsed since the start (frozen at the last phase stamp
    /// once the run is terminal)
    pub elapsed_ms: i64,

    /// Projected total duration: elapsed plus a fixed allowance per minigrid
    /// still awaiting analysis
    pub estimated_duration_ms: i64,

    pub clusters_found: Option<i64>,
    pub minigrids_found: Option<i64>,

    /// Minigrids that reached any terminal simulation state
    pub minigrids_analyzed: i64,

    /// Minigrids with a computed results summary
    pub minigrids_calculated: i64,

    /// Minigrids whose simulation failed or was cut short
    pub minigrids_aborted: i64,

    /// Clusters whose simulation was fully processed, summary included
    pub results: Vec<Cluster>,
}

/// Full record of one minigrid candidate: the cluster, its simulation and
/// the raw optimizer inputs and outputs
#[derive(Debug, Clone, Serialize)]
pub struct MinigridDetail {
    pub cluster: Cluster,
    pub simulation_id: Uuid,
    pub simulation_status: SimulationStatus,
    pub grid_input: String,
    pub grid_results: Option<String>,
    pub supply_input: String,
    pub supply_results: Option<String>,
}

/// Orchestration engine for minigrid explorations
pub struct ExplorationEngine {
    store: Arc<ExplorationStore>,
    config: Arc<EngineConfig>,
    collaborators: Collaborators,
}

impl ExplorationEngine {
    pub fn new(
        store: Arc<ExplorationStore>,
        config: Arc<EngineConfig>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            config,
            collaborators,
        }
    }

    /// Start a new exploration and return its id.
    ///
    /// Candidates of the previous run are wiped first; past exploration
    /// records themselves are kept. Fails with Conflict while another
    /// exploration is RUNNING and with Validation on out-of-range
    /// parameters. The pipeline runs as a detached task; callers follow it
    /// through [`progress`](Self::progress).
    pub fn start(&self, parameters: ExplorationParameters) -> Result<Uuid> {
        parameters.validate()?;
        // Claim the single RUNNING slot first: a rejected start must leave
        // the candidates of the run it conflicted with untouched
        let exploration = self.store.create_exploration(parameters.clone())?;
        let exploration_id = exploration.id;
        self.store.reset_candidates()?;

        let store = self.store.clone();
        let config = self.config.clone();
        let collaborators = self.collaborators.clone();
        tokio::spawn(async move {
            if let Err(e) =
                run_exploration(store, config, collaborators, exploration_id, parameters).await
            {
                error!(%exploration_id, error = %e, "exploration pipeline failed");
            }
        });

        info!(%exploration_id, "exploration accepted");
        Ok(exploration_id)
    }

    /// Request a cooperative stop of a running exploration.
    ///
    /// Returns NotFound for an unknown id and Conflict when the exploration
    /// is no longer RUNNING. Workers observe the flag at their next
    /// checkpoint; in-flight optimizer requests are left to complete and
    /// their results discarded.
    pub fn stop(&self, exploration_id: Uuid) -> Result<()> {
        self.store.request_stop(exploration_id)
    }

    /// Progress snapshot, valid at any point of the lifecycle
    pub fn progress(&self, exploration_id: Uuid) -> Result<ExplorationProgress> {
        let exploration = self
            .store
            .get_exploration(exploration_id)?
            .ok_or_else(|| ExploreError::NotFound(format!("exploration {exploration_id}")))?;

        let simulations = self.store.all_simulations(exploration_id)?;
        let mut calculated: i64 = 0;
        let mut aborted: i64 = 0;
        for simulation in &simulations {
            match simulation.status {
                SimulationStatus::Processed => calculated += 1,
                SimulationStatus::Error
                | SimulationStatus::Stopped
                | SimulationStatus::ProcessedError => aborted += 1,
                _ => {}
            }
        }
        let analyzed = calculated + aborted;

        // Frozen at the last phase stamp once terminal, live otherwise
        let end = if exploration.status.is_terminal() {
            exploration
                .optimizer_finished_at
                .or(exploration.optimizer_inputs_generated_at)
                .or(exploration.clusters_found_at)
                .unwrap_or(exploration.created_at)
        } else {
            now_ms()
        };
        let elapsed_ms = (end - exploration.created_at).max(0);
        let remaining = exploration
            .minigrids_found
            .map_or(0, |found| (found - analyzed).max(0));
        let estimated_duration_ms = elapsed_ms + ESTIMATE_PER_MINIGRID_MS * remaining;

        let processed_cluster_ids: Vec<i64> = simulations
            .iter()
            .filter(|s| s.status == SimulationStatus::Processed)
            .map(|s| s.cluster_id)
            .collect();
        let results = self
            .store
            .list_clusters(exploration_id)?
            .into_iter()
            .filter(|c| processed_cluster_ids.contains(&c.cluster_id))
            .collect();

        Ok(ExplorationProgress {
            exploration_id,
            status: exploration.status,
            started_at: exploration.created_at,
            elapsed_ms,
            estimated_duration_ms,
            clusters_found: exploration.clusters_found,
            minigrids_found: exploration.minigrids_found,
            minigrids_analyzed: analyzed,
            minigrids_calculated: calculated,
            minigrids_aborted: aborted,
            results,
        })
    }

    /// Full record of one minigrid candidate by simulation id
    pub fn minigrid(&self, exploration_id: Uuid, simulation_id: Uuid) -> Result<MinigridDetail> {
        let simulation: Simulation = self
            .store
            .get_simulation(simulation_id)?
            .filter(|s| s.exploration_id == exploration_id)
            .ok_or_else(|| ExploreError::NotFound(format!("simulation {simulation_id}")))?;
        let cluster = self
            .store
            .get_cluster(exploration_id, simulation.cluster_id)?
            .ok_or_else(|| {
                ExploreError::NotFound(format!(
                    "cluster {} of exploration {exploration_id}",
                    simulation.cluster_id
                ))
            })?;

        Ok(MinigridDetail {
            cluster,
            simulation_id: simulation.id,
            simulation_status: simulation.status,
            grid_input: simulation.grid_input,
            grid_results: simulation.grid_results,
            supply_input: simulation.supply_input,
            supply_results: simulation.supply_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterCandidate, ResultsSummary};

    fn candidate(cluster_id: i64) -> ClusterCandidate {
        ClusterCandidate {
            cluster_id,
            province: "Nampula".to_string(),
            num_buildings: 40,
            distance_to_grid_m: 65_000.0,
            avg_distance_to_road_m: 300.0,
            avg_surface: 22.0,
            eps_meters: 300.0,
            diameter_km: 5.0,
            grid_distance_km: 60.0,
            latitude: -15.1,
            longitude: 39.3,
            buildings: vec![],
        }
    }

    fn engine_with_store() -> (ExplorationEngine, Arc<ExplorationStore>) {
        use crate::clustering::DbscanClusterSource;
        use crate::inputs::ProfileInputSynthesizer;
        use crate::results::FinancialSummarizer;

        let store = Arc::new(ExplorationStore::in_memory().unwrap());
        let collaborators = Collaborators {
            cluster_source: Arc::new(DbscanClusterSource::new(vec![], vec![])),
            input_synthesizer: Arc::new(ProfileInputSynthesizer::new().with_n_days(1)),
            optimizer: Arc::new(
                crate::gateway::HttpOptimizerGateway::new(&EngineConfig::default()).unwrap(),
            ),
            summarizer: Arc::new(FinancialSummarizer::new()),
        };
        let engine = ExplorationEngine::new(
            store.clone(),
            Arc::new(EngineConfig::default()),
            collaborators,
        );
        (engine, store)
    }

    #[test]
    fn test_progress_for_unknown_exploration_is_not_found() {
        let (engine, _store) = engine_with_store();
        let err = engine.progress(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ExploreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_progress_counts_follow_simulation_states() {
        let (engine, store) = engine_with_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        for cluster_id in [1, 2, 3] {
            let cluster = Cluster::from_candidate(exploration.id, candidate(cluster_id));
            store.insert_cluster(&cluster).unwrap();
        }
        store.set_discovery_counts(exploration.id, 4, 3).unwrap();

        let processed = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        store.create_simulation(&processed).unwrap();
        store
            .set_simulation_status(processed.id, SimulationStatus::Processed)
            .unwrap();
        store
            .write_cluster_results(
                exploration.id,
                1,
                &ResultsSummary {
                    lcoe: Some(0.4),
                    capex: Some(120_000.0),
                    res: Some(75.0),
                    co2_savings: Some(88.0),
                    consumption_total: Some(70_000.0),
                },
            )
            .unwrap();

        let failed = Simulation::new(exploration.id, 2, "{}".into(), "{}".into());
        store.create_simulation(&failed).unwrap();
        store
            .set_simulation_status(failed.id, SimulationStatus::ProcessedError)
            .unwrap();

        let running = Simulation::new(exploration.id, 3, "{}".into(), "{}".into());
        store.create_simulation(&running).unwrap();
        store
            .set_simulation_status(running.id, SimulationStatus::Running)
            .unwrap();

        let progress = engine.progress(exploration.id).unwrap();
        assert_eq!(progress.status, ExplorationStatus::Running);
        assert_eq!(progress.clusters_found, Some(4));
        assert_eq!(progress.minigrids_found, Some(3));
        assert_eq!(progress.minigrids_calculated, 1);
        assert_eq!(progress.minigrids_aborted, 1);
        assert_eq!(progress.minigrids_analyzed, 2);
        assert!(progress.estimated_duration_ms >= progress.elapsed_ms + ESTIMATE_PER_MINIGRID_MS);

        // Only the processed cluster appears among the results
        assert_eq!(progress.results.len(), 1);
        assert_eq!(progress.results[0].cluster_id, 1);
        assert_eq!(progress.results[0].results.lcoe, Some(0.4));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_parameters() {
        let (engine, _store) = engine_with_store();
        let err = engine
            .start(ExplorationParameters {
                consumer_count_min: 10,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ExploreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_start_wipes_previous_candidates() {
        let (engine, store) = engine_with_store();
        let old = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let cluster = Cluster::from_candidate(old.id, candidate(1));
        store.insert_cluster(&cluster).unwrap();
        store.finalize(old.id, ExplorationStatus::Finished).unwrap();

        let id = engine.start(ExplorationParameters::default()).unwrap();
        assert_ne!(id, old.id);
        assert!(store.list_clusters(old.id).unwrap().is_empty());
        // The old exploration record itself survives
        assert!(store.get_exploration(old.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_start_conflicts_while_running() {
        let (engine, store) = engine_with_store();
        let running = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let err = engine.start(ExplorationParameters::default()).unwrap_err();
        assert!(matches!(err, ExploreError::Conflict(_)));
        store.request_stop(running.id).unwrap();
    }

    #[tokio::test]
    async fn test_stop_unknown_and_terminal_explorations() {
        let (engine, store) = engine_with_store();
        assert!(matches!(
            engine.stop(Uuid::new_v4()).unwrap_err(),
            ExploreError::NotFound(_)
        ));

        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        store
            .finalize(exploration.id, ExplorationStatus::Finished)
            .unwrap();
        assert!(matches!(
            engine.stop(exploration.id).unwrap_err(),
            ExploreError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_minigrid_detail_requires_matching_exploration() {
        let (engine, store) = engine_with_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let cluster = Cluster::from_candidate(exploration.id, candidate(1));
        store.insert_cluster(&cluster).unwrap();
        let simulation = Simulation::new(exploration.id, 1, "{\"n\":1}".into(), "{}".into());
        store.create_simulation(&simulation).unwrap();

        let detail = engine.minigrid(exploration.id, simulation.id).unwrap();
        assert_eq!(detail.cluster.cluster_id, 1);
        assert_eq!(detail.grid_input, "{\"n\":1}");
        assert!(detail.grid_results.is_none());

        let err = engine.minigrid(Uuid::new_v4(), simulation.id).unwrap_err();
        assert!(matches!(err, ExploreError::NotFound(_)));
    }
}
