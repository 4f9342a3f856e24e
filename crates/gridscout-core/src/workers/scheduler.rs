//! Optimization scheduler: bounded-concurrency engine driving simulations
//! through the two external optimizers.
//!
//! The scheduler owns a fixed array of slots, each holding one in-flight
//! simulation and its two poll handles. Slots are local to this task; all
//! cross-worker state lives in the store. A fixed pacing delay runs in front
//! of every gateway call so the external services are never hit slot after
//! slot without a gap, and the stop flag is re-read before each of those
//! calls.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{ExplorationStatus, Simulation, SimulationStatus};
use crate::error::Result;
use crate::gateway::{Optimizer, OptimizerKind, PollHandle, PollOutcome};
use crate::store::ExplorationStore;

/// One unit of bounded concurrency: an in-flight simulation and whichever of
/// its two poll handles are still unresolved
#[derive(Default)]
struct Slot {
    simulation_id: Option<Uuid>,
    grid: Option<PollHandle>,
    supply: Option<PollHandle>,
}

impl Slot {
    fn occupied(&self) -> bool {
        self.simulation_id.is_some()
    }

    fn clear(&mut self) {
        self.simulation_id = None;
        self.grid = None;
        self.supply = None;
    }
}

/// Outcome of attempting to put one pending simulation in flight
enum SubmitOutcome {
    InFlight { grid: PollHandle, supply: PollHandle },
    Errored,
}

/// Submit both optimizer requests for one pending simulation.
///
/// The simulation only becomes RUNNING once both submits are accepted; a
/// failed submit moves it straight from PENDING to ERROR and it counts as
/// executed. Submits go out in grid-then-supply order, so a grid failure
/// skips the supply submit.
async fn submit_simulation(
    store: &ExplorationStore,
    optimizer: &dyn Optimizer,
    simulation: &Simulation,
) -> Result<SubmitOutcome> {
    let grid_payload: serde_json::Value = serde_json::from_str(&simulation.grid_input)?;
    let supply_payload: serde_json::Value = serde_json::from_str(&simulation.supply_input)?;

    let grid = match optimizer.submit(OptimizerKind::Grid, &grid_payload).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(simulation_id = %simulation.id, error = %e, "grid submit failed");
            store.set_simulation_status(simulation.id, SimulationStatus::Error)?;
            return Ok(SubmitOutcome::Errored);
        }
    };
    let supply = match optimizer.submit(OptimizerKind::Supply, &supply_payload).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(simulation_id = %simulation.id, error = %e, "supply submit failed");
            store.set_simulation_status(simulation.id, SimulationStatus::Error)?;
            return Ok(SubmitOutcome::Errored);
        }
    };
    store.set_simulation_status(simulation.id, SimulationStatus::Running)?;
    debug!(simulation_id = %simulation.id, "simulation in flight");
    Ok(SubmitOutcome::InFlight { grid, supply })
}

/// Drive all of one exploration's simulations through the optimizers with at
/// most `config.slots` concurrently in flight. Returns once every simulation
/// has left PENDING/RUNNING or the exploration is stopped.
pub async fn run_scheduler(
    store: Arc<ExplorationStore>,
    optimizer: Arc<dyn Optimizer>,
    config: Arc<EngineConfig>,
    exploration_id: Uuid,
) -> Result<()> {
    let num_slots = config.slots;

    // Wait until pending work exists. Leaves immediately when the discovery
    // phase found nothing, so an empty exploration cannot hang here.
    loop {
        if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
            return Ok(());
        }
        let exploration = store
            .get_exploration(exploration_id)?
            .ok_or_else(|| crate::error::ExploreError::NotFound(format!(
                "exploration {exploration_id}"
            )))?;
        if exploration.minigrids_found == Some(0) {
            info!(%exploration_id, "no minigrids discovered, scheduler has nothing to run");
            return Ok(());
        }
        let pending = store.count_by_status(exploration_id, &[SimulationStatus::Pending])?;
        if pending > 0 {
            break;
        }
        tokio::time::sleep(config.poll_interval()).await;
    }

    let mut slots: Vec<Slot> = (0..num_slots).map(|_| Slot::default()).collect();
    let mut executed: i64 = 0;
    let mut last_batch = false;

    // Initial fill
    let initial = store.list_simulations(
        exploration_id,
        &[SimulationStatus::Pending],
        Some(num_slots),
    )?;
    for (i, simulation) in initial.iter().enumerate() {
        tokio::time::sleep(config.pacing_delay()).await;
        if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
            return Ok(());
        }
        match submit_simulation(&store, optimizer.as_ref(), simulation).await? {
            SubmitOutcome::InFlight { grid, supply } => {
                slots[i] = Slot {
                    simulation_id: Some(simulation.id),
                    grid: Some(grid),
                    supply: Some(supply),
                };
            }
            SubmitOutcome::Errored => executed += 1,
        }
    }

    loop {
        if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
            return Ok(());
        }
        let exploration = store
            .get_exploration(exploration_id)?
            .ok_or_else(|| crate::error::ExploreError::NotFound(format!(
                "exploration {exploration_id}"
            )))?;
        let total = exploration.minigrids_found.unwrap_or(i64::MAX);
        if !slots.iter().any(Slot::occupied) && executed >= total {
            break;
        }

        tokio::time::sleep(config.poll_interval()).await;

        for slot in slots.iter_mut() {
            tokio::time::sleep(config.pacing_delay()).await;
            if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
                return Ok(());
            }

            if !slot.occupied() {
                // Opportunistic single-slot refill, disabled for the final
                // batch so the tail is only fetched by the bulk refill below
                if last_batch {
                    continue;
                }
                let candidates = store.list_simulations(
                    exploration_id,
                    &[SimulationStatus::Pending],
                    Some(1),
                )?;
                let Some(simulation) = candidates.into_iter().next() else {
                    continue;
                };
                match submit_simulation(&store, optimizer.as_ref(), &simulation).await? {
                    SubmitOutcome::InFlight { grid, supply } => {
                        slot.simulation_id = Some(simulation.id);
                        slot.grid = Some(grid);
                        slot.supply = Some(supply);
                    }
                    SubmitOutcome::Errored => executed += 1,
                }
                continue;
            }

            let simulation_id = slot.simulation_id.expect("occupied slot has an id");
            let mut errored = false;

            if let Some(handle) = slot.grid.clone() {
                match optimizer.poll(&handle).await {
                    Ok(PollOutcome::Pending) => {}
                    Ok(PollOutcome::Done(results)) => {
                        store.write_grid_results(simulation_id, &results.to_string())?;
                        slot.grid = None;
                    }
                    Ok(PollOutcome::Failed) | Err(_) => errored = true,
                }
            }
            if !errored {
                if let Some(handle) = slot.supply.clone() {
                    match optimizer.poll(&handle).await {
                        Ok(PollOutcome::Pending) => {}
                        Ok(PollOutcome::Done(results)) => {
                            store.write_supply_results(simulation_id, &results.to_string())?;
                            slot.supply = None;
                        }
                        Ok(PollOutcome::Failed) | Err(_) => errored = true,
                    }
                }
            }

            if errored {
                warn!(%simulation_id, "optimizer poll failed, simulation marked ERROR");
                store.set_simulation_status(simulation_id, SimulationStatus::Error)?;
                slot.clear();
                executed += 1;
                continue;
            }

            // Both sub-results resolved: finish the simulation and free the
            // slot. The status guard keeps an ERROR set elsewhere intact.
            if slot.grid.is_none() && slot.supply.is_none() {
                if let Some(simulation) = store.get_simulation(simulation_id)? {
                    if simulation.status == SimulationStatus::Running {
                        store.set_simulation_status(simulation_id, SimulationStatus::Finished)?;
                    }
                }
                slot.clear();
                executed += 1;
                debug!(%simulation_id, executed, "simulation completed");
            }
        }

        // All slots idle with work remaining: bulk refill
        let exploration = store
            .get_exploration(exploration_id)?
            .ok_or_else(|| crate::error::ExploreError::NotFound(format!(
                "exploration {exploration_id}"
            )))?;
        let total = exploration.minigrids_found.unwrap_or(i64::MAX);
        if !slots.iter().any(Slot::occupied) && executed < total {
            if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
                return Ok(());
            }
            let want = num_slots.min((total - executed).max(0) as usize);
            let batch = store.list_simulations(
                exploration_id,
                &[SimulationStatus::Pending],
                Some(want),
            )?;
            if batch.is_empty() {
                // Nothing pending and nothing in flight. The input generator
                // may still be creating simulations, so leaving is only safe
                // once every discovered minigrid has one; until then sleep at
                // the loop head and re-poll.
                let active = store.count_by_status(
                    exploration_id,
                    &[SimulationStatus::Pending, SimulationStatus::Running],
                )?;
                let created = store.count_simulations(exploration_id)?;
                if active == 0 && created >= total {
                    break;
                }
            }
            for (i, simulation) in batch.iter().enumerate() {
                tokio::time::sleep(config.pacing_delay()).await;
                if store.exploration_status(exploration_id)? == ExplorationStatus::Stopped {
                    return Ok(());
                }
                match submit_simulation(&store, optimizer.as_ref(), simulation).await? {
                    SubmitOutcome::InFlight { grid, supply } => {
                        slots[i] = Slot {
                            simulation_id: Some(simulation.id),
                            grid: Some(grid),
                            supply: Some(supply),
                        };
                    }
                    SubmitOutcome::Errored => executed += 1,
                }
            }
            if total != i64::MAX && total - executed <= num_slots as i64 {
                last_batch = true;
            }
        }
    }

    info!(%exploration_id, executed, "scheduler finished");
    Ok(())
}
