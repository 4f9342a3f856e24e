//! Domain entities: Exploration, Cluster, Simulation.
//!
//! One Exploration owns the Clusters discovered by the clustering phase and
//! exactly one Simulation per Cluster. All three are persisted in the
//! [`ExplorationStore`](crate::store::ExplorationStore); workers hold no
//! authoritative in-memory state across calls.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExploreError, Result};

/// Current time as epoch milliseconds, the persisted timestamp format
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Validated numeric parameters of one exploration run.
///
/// All distances are in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationParameters {
    /// Minimum number of consumers (buildings) a cluster must have
    pub consumer_count_min: u32,

    /// Maximum euclidean distance between the two most distant consumers
    pub diameter_max: f64,

    /// Minimum distance from the national grid for a site to qualify
    pub distance_from_grid_min: f64,

    /// Candidates at this distance or less from an already existing minigrid
    /// are filtered out
    pub match_distance_max: f64,
}

impl Default for ExplorationParameters {
    fn default() -> Self {
        Self {
            consumer_count_min: 100,
            diameter_max: 5_000.0,
            distance_from_grid_min: 60_000.0,
            match_distance_max: 5_000.0,
        }
    }
}

impl ExplorationParameters {
    /// Check all numeric ranges. Rejected parameters never reach the store.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_count_min <= 30 || self.consumer_count_min > 500 {
            return Err(ExploreError::Validation(format!(
                "consumer_count_min must be in (30, 500], got {}",
                self.consumer_count_min
            )));
        }
        if !(self.diameter_max > 0.0 && self.diameter_max <= 10_000.0) {
            return Err(ExploreError::Validation(format!(
                "diameter_max must be in (0, 10000] meters, got {}",
                self.diameter_max
            )));
        }
        if !(20_000.0..=120_000.0).contains(&self.distance_from_grid_min) {
            return Err(ExploreError::Validation(format!(
                "distance_from_grid_min must be in [20000, 120000] meters, got {}",
                self.distance_from_grid_min
            )));
        }
        if !(100.0..=20_000.0).contains(&self.match_distance_max) {
            return Err(ExploreError::Validation(format!(
                "match_distance_max must be in [100, 20000] meters, got {}",
                self.match_distance_max
            )));
        }
        Ok(())
    }
}

/// Lifecycle of an exploration run.
///
/// At most one exploration may be RUNNING at any time. STOPPED is set by a
/// caller stop request and observed cooperatively by every worker; FINISHED
/// and ERROR are set exactly once by the orchestrator after all workers join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplorationStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "STOPPED")]
    Stopped,
}

impl ExplorationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationStatus::Running => "RUNNING",
            ExplorationStatus::Finished => "FINISHED",
            ExplorationStatus::Error => "ERROR",
            ExplorationStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "RUNNING" => Ok(ExplorationStatus::Running),
            "FINISHED" => Ok(ExplorationStatus::Finished),
            "ERROR" => Ok(ExplorationStatus::Error),
            "STOPPED" => Ok(ExplorationStatus::Stopped),
            other => Err(ExploreError::Validation(format!(
                "unknown exploration status '{other}'"
            ))),
        }
    }

    /// FINISHED, ERROR and STOPPED are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExplorationStatus::Running)
    }
}

/// One exploration run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exploration {
    pub id: Uuid,
    pub parameters: ExplorationParameters,

    /// Count of raw clusters found, set once when clustering completes
    pub clusters_found: Option<i64>,

    /// Count of candidate minigrids (one simulation each), set once when
    /// input generation starts
    pub minigrids_found: Option<i64>,

    pub clusters_found_at: Option<i64>,
    pub optimizer_inputs_generated_at: Option<i64>,
    pub optimizer_finished_at: Option<i64>,

    pub status: ExplorationStatus,
    pub created_at: i64,
}

impl Exploration {
    pub fn new(parameters: ExplorationParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            parameters,
            clusters_found: None,
            minigrids_found: None,
            clusters_found_at: None,
            optimizer_inputs_generated_at: None,
            optimizer_finished_at: None,
            status: ExplorationStatus::Running,
            created_at: now_ms(),
        }
    }
}

/// One member building of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterBuilding {
    pub building_id: i64,
    pub building_type: String,
    pub surface: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
}

/// A spatially coherent group of buildings produced by the clustering phase,
/// before it is persisted and scoped to an exploration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCandidate {
    pub cluster_id: i64,
    pub province: String,
    pub num_buildings: i64,
    pub distance_to_grid_m: f64,
    pub avg_distance_to_road_m: f64,
    pub avg_surface: f64,
    pub eps_meters: f64,
    pub diameter_km: f64,
    pub grid_distance_km: f64,
    /// Geographic centroid
    pub latitude: f64,
    pub longitude: f64,
    pub buildings: Vec<ClusterBuilding>,
}

/// Financial/energy summary written once onto a cluster by the result
/// processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    /// Levelized cost of energy. Units: $/kWh.
    pub lcoe: Option<f64>,
    /// Capital expenditure. Units: $US.
    pub capex: Option<f64>,
    /// Renewable energy share, 0-100.
    pub res: Option<f64>,
    /// CO2 emission savings. Units: tonne/year.
    pub co2_savings: Option<f64>,
    /// Total consumption. Units: kWh/year.
    pub consumption_total: Option<f64>,
}

/// One persisted cluster record.
///
/// Centroid and cluster_id are immutable after creation; the five result
/// fields stay null until the result processor writes them exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub exploration_id: Uuid,
    pub cluster_id: i64,
    pub province: String,
    pub num_buildings: i64,
    pub distance_to_grid_m: f64,
    pub avg_distance_to_road_m: f64,
    pub avg_surface: f64,
    pub eps_meters: f64,
    pub diameter_km: f64,
    pub grid_distance_km: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub buildings: Vec<ClusterBuilding>,
    pub results: ResultsSummary,
    pub created_at: i64,
}

impl Cluster {
    pub fn from_candidate(exploration_id: Uuid, candidate: ClusterCandidate) -> Self {
        Self {
            id: Uuid::new_v4(),
            exploration_id,
            cluster_id: candidate.cluster_id,
            province: candidate.province,
            num_buildings: candidate.num_buildings,
            distance_to_grid_m: candidate.distance_to_grid_m,
            avg_distance_to_road_m: candidate.avg_distance_to_road_m,
            avg_surface: candidate.avg_surface,
            eps_meters: candidate.eps_meters,
            diameter_km: candidate.diameter_km,
            grid_distance_km: candidate.grid_distance_km,
            latitude: candidate.latitude,
            longitude: candidate.longitude,
            buildings: candidate.buildings,
            results: ResultsSummary::default(),
            created_at: now_ms(),
        }
    }
}

/// Result of the clustering phase
#[derive(Debug, Clone)]
pub struct ClusteringOutcome {
    /// Raw cluster count reported by the clustering collaborator, before the
    /// match-distance filter
    pub clusters_found: i64,
    pub candidates: Vec<ClusterCandidate>,
}

/// Lifecycle of one simulation through the optimizer pipeline.
///
/// Status only moves forward: PENDING -> RUNNING -> FINISHED|ERROR ->
/// PROCESSED|PROCESSED_ERROR. FINISHED requires both the grid and supply
/// sub-results to be individually resolved, in either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimulationStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "PROCESSED_ERROR")]
    ProcessedError,
    #[serde(rename = "PROCESSED")]
    Processed,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Pending => "PENDING",
            SimulationStatus::Running => "RUNNING",
            SimulationStatus::Finished => "FINISHED",
            SimulationStatus::Stopped => "STOPPED",
            SimulationStatus::Error => "ERROR",
            SimulationStatus::ProcessedError => "PROCESSED_ERROR",
            SimulationStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(SimulationStatus::Pending),
            "RUNNING" => Ok(SimulationStatus::Running),
            "FINISHED" => Ok(SimulationStatus::Finished),
            "STOPPED" => Ok(SimulationStatus::Stopped),
            "ERROR" => Ok(SimulationStatus::Error),
            "PROCESSED_ERROR" => Ok(SimulationStatus::ProcessedError),
            "PROCESSED" => Ok(SimulationStatus::Processed),
            other => Err(ExploreError::Validation(format!(
                "unknown simulation status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimulationStatus::Processed | SimulationStatus::ProcessedError
        )
    }
}

/// One simulation record: a cluster's run through the two external optimizers.
///
/// grid_input and supply_input are written together at creation and never
/// mutated; grid_results/supply_results are each written at most once by the
/// scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub id: Uuid,
    pub exploration_id: Uuid,
    pub cluster_id: i64,
    pub grid_input: String,
    pub supply_input: String,
    pub grid_results: Option<String>,
    pub supply_results: Option<String>,
    pub status: SimulationStatus,
    pub created_at: i64,
}

impl Simulation {
    pub fn new(
        exploration_id: Uuid,
        cluster_id: i64,
        grid_input: String,
        supply_input: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exploration_id,
            cluster_id,
            grid_input,
            supply_input,
            grid_results: None,
            supply_results: None,
            status: SimulationStatus::Pending,
            created_at: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters_are_valid() {
        assert!(ExplorationParameters::default().validate().is_ok());
    }

    #[test]
    fn test_parameter_ranges() {
        let mut p = ExplorationParameters::default();
        p.consumer_count_min = 30;
        assert!(p.validate().is_err());

        let mut p = ExplorationParameters::default();
        p.diameter_max = 10_001.0;
        assert!(p.validate().is_err());

        let mut p = ExplorationParameters::default();
        p.distance_from_grid_min = 19_999.0;
        assert!(p.validate().is_err());

        let mut p = ExplorationParameters::default();
        p.match_distance_max = 99.0;
        assert!(p.validate().is_err());

        let mut p = ExplorationParameters::default();
        p.match_distance_max = 20_000.0;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SimulationStatus::Pending,
            SimulationStatus::Running,
            SimulationStatus::Finished,
            SimulationStatus::Stopped,
            SimulationStatus::Error,
            SimulationStatus::ProcessedError,
            SimulationStatus::Processed,
        ] {
            assert_eq!(SimulationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SimulationStatus::parse("UNKNOWN").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SimulationStatus::Processed.is_terminal());
        assert!(SimulationStatus::ProcessedError.is_terminal());
        assert!(!SimulationStatus::Finished.is_terminal());
        assert!(ExplorationStatus::Stopped.is_terminal());
        assert!(!ExplorationStatus::Running.is_terminal());
    }

    #[test]
    fn test_new_simulation_is_pending() {
        let sim = Simulation::new(Uuid::new_v4(), 7, "{}".into(), "{}".into());
        assert_eq!(sim.status, SimulationStatus::Pending);
        assert!(sim.grid_results.is_none());
        assert!(sim.supply_results.is_none());
    }
}
