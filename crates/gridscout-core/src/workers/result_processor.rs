//! Result processor: consumes finished and errored simulations, writes the
//! financial summary onto the owning cluster and moves each simulation to
//! its terminal PROCESSED state.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ExplorationStatus, SimulationStatus};
use crate::error::{ExploreError, Result};
use crate::results::ResultsSummarizer;
use crate::store::ExplorationStore;

const CONSUMABLE: [SimulationStatus; 2] = [SimulationStatus::Finished, SimulationStatus::Error];

/// Consume FINISHED/ERROR simulations until every discovered minigrid has a
/// terminal simulation or the exploration is stopped.
pub async fn run_result_processor(
    store: Arc<ExplorationStore>,
    summarizer: Arc<dyn ResultsSummarizer>,
    config: Arc<crate::config::EngineConfig>,
    exploration_id: Uuid,
) -> Result<()> {
    // Wait for the first consumable simulation
    loop {
        if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
            return Ok(());
        }
        let exploration = store
            .get_exploration(exploration_id)?
            .ok_or_else(|| ExploreError::NotFound(format!("exploration {exploration_id}")))?;
        if exploration.minigrids_found == Some(0) {
            info!(%exploration_id, "no minigrids discovered, nothing to process");
            return Ok(());
        }
        if store.count_by_status(exploration_id, &CONSUMABLE)? > 0 {
            break;
        }
        tokio::time::sleep(config.poll_interval()).await;
    }

    let exploration = store
        .get_exploration(exploration_id)?
        .ok_or_else(|| ExploreError::NotFound(format!("exploration {exploration_id}")))?;
    let total = exploration.minigrids_found.ok_or_else(|| {
        ExploreError::PhaseFailed {
            phase: "result-processor",
            message: "minigrid count was never recorded".to_string(),
        }
    })?;

    let mut num_processed: i64 = 0;
    while num_processed < total {
        if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
            return Ok(());
        }

        let simulations = store.list_simulations(exploration_id, &CONSUMABLE, None)?;
        if simulations.is_empty() {
            tokio::time::sleep(config.poll_interval()).await;
            continue;
        }

        for simulation in simulations {
            if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
                return Ok(());
            }

            match simulation.status {
                SimulationStatus::Finished => {
                    let summary = summarizer
                        .summarize(
                            &simulation.grid_input,
                            simulation.grid_results.as_deref(),
                            &simulation.supply_input,
                            simulation.supply_results.as_deref(),
                        )
                        .await;
                    match summary {
                        Ok(summary) => {
                            store.write_cluster_results(
                                exploration_id,
                                simulation.cluster_id,
                                &summary,
                            )?;
                            store.set_simulation_status(
                                simulation.id,
                                SimulationStatus::Processed,
                            )?;
                            debug!(
                                simulation_id = %simulation.id,
                                cluster_id = simulation.cluster_id,
                                "simulation processed"
                            );
                        }
                        Err(e) => {
                            // A summary failure only fails this simulation
                            warn!(
                                simulation_id = %simulation.id,
                                error = %e,
                                "results computation failed"
                            );
                            store.set_simulation_status(
                                simulation.id,
                                SimulationStatus::ProcessedError,
                            )?;
                        }
                    }
                }
                SimulationStatus::Error => {
                    store
                        .set_simulation_status(simulation.id, SimulationStatus::ProcessedError)?;
                    debug!(simulation_id = %simulation.id, "errored simulation consumed");
                }
                other => {
                    debug!(simulation_id = %simulation.id, status = other.as_str(), "skipped");
                    continue;
                }
            }
            num_processed += 1;
        }
    }

    info!(%exploration_id, num_processed, "result processing finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::{
        Cluster, ClusterCandidate, ExplorationParameters, ResultsSummary, Simulation,
    };
    use async_trait::async_trait;

    struct FixedSummarizer(ResultsSummary);

    #[async_trait]
    impl ResultsSummarizer for FixedSummarizer {
        async fn summarize(
            &self,
            _grid_input: &str,
            _grid_results: Option<&str>,
            _supply_input: &str,
            _supply_results: Option<&str>,
        ) -> Result<ResultsSummary> {
            Ok(self.0.clone())
        }
    }

    fn candidate(cluster_id: i64) -> ClusterCandidate {
        ClusterCandidate {
            cluster_id,
            province: "Sofala".to_string(),
            num_buildings: 10,
            distance_to_grid_m: 60_000.0,
            avg_distance_to_road_m: 100.0,
            avg_surface: 25.0,
            eps_meters: 300.0,
            diameter_km: 5.0,
            grid_distance_km: 60.0,
            latitude: -19.8,
            longitude: 34.8,
            buildings: vec![],
        }
    }

    fn summary() -> ResultsSummary {
        ResultsSummary {
            lcoe: Some(0.38),
            capex: Some(150_000.0),
            res: Some(82.0),
            co2_savings: Some(95.0),
            consumption_total: Some(80_000.0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_and_errored_simulations_reach_terminal_states() {
        let store = Arc::new(ExplorationStore::in_memory().unwrap());
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        for cluster_id in [1, 2] {
            let cluster = Cluster::from_candidate(exploration.id, candidate(cluster_id));
            store.insert_cluster(&cluster).unwrap();
        }
        let finished = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        store.create_simulation(&finished).unwrap();
        store
            .set_simulation_status(finished.id, SimulationStatus::Finished)
            .unwrap();
        let errored = Simulation::new(exploration.id, 2, "{}".into(), "{}".into());
        store.create_simulation(&errored).unwrap();
        store
            .set_simulation_status(errored.id, SimulationStatus::Error)
            .unwrap();
        store.set_discovery_counts(exploration.id, 2, 2).unwrap();

        run_result_processor(
            store.clone(),
            Arc::new(FixedSummarizer(summary())),
            Arc::new(EngineConfig::new().with_poll_interval_ms(10)),
            exploration.id,
        )
        .await
        .unwrap();

        assert_eq!(
            store.get_simulation(finished.id).unwrap().unwrap().status,
            SimulationStatus::Processed
        );
        assert_eq!(
            store.get_simulation(errored.id).unwrap().unwrap().status,
            SimulationStatus::ProcessedError
        );

        // The finished simulation's cluster received the summary
        let cluster = store.get_cluster(exploration.id, 1).unwrap().unwrap();
        assert_eq!(cluster.results, summary());
        let untouched = store.get_cluster(exploration.id, 2).unwrap().unwrap();
        assert!(untouched.results.lcoe.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_late_simulations() {
        let store = Arc::new(ExplorationStore::in_memory().unwrap());
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let cluster = Cluster::from_candidate(exploration.id, candidate(1));
        store.insert_cluster(&cluster).unwrap();
        store.set_discovery_counts(exploration.id, 1, 1).unwrap();

        let simulation = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        store.create_simulation(&simulation).unwrap();

        let worker = tokio::spawn(run_result_processor(
            store.clone(),
            Arc::new(FixedSummarizer(summary())),
            Arc::new(EngineConfig::new().with_poll_interval_ms(10)),
            exploration.id,
        ));

        // The simulation only finishes after the processor started waiting
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        store
            .set_simulation_status(simulation.id, SimulationStatus::Finished)
            .unwrap();

        worker.await.unwrap().unwrap();
        assert_eq!(
            store.get_simulation(simulation.id).unwrap().unwrap().status,
            SimulationStatus::Processed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_wait_returns_promptly() {
        let store = Arc::new(ExplorationStore::in_memory().unwrap());
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        store.set_discovery_counts(exploration.id, 1, 1).unwrap();

        let worker = tokio::spawn(run_result_processor(
            store.clone(),
            Arc::new(FixedSummarizer(summary())),
            Arc::new(EngineConfig::new().with_poll_interval_ms(10)),
            exploration.id,
        ));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        store.request_stop(exploration.id).unwrap();

        worker.await.unwrap().unwrap();
    }
}
