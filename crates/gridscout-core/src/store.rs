//! ExplorationStore — SQLite persistent storage for explorations, clusters
//! and simulations.
//!
//! The store is the single shared mutable resource of the pipeline: all
//! cross-worker coordination happens through it. Every operation takes the
//! connection mutex for its whole duration, so each call is atomic with
//! respect to concurrent callers and every update is visible to subsequent
//! reads by any worker. WAL mode keeps reads non-blocking for outside
//! inspection of a running exploration.

use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

use crate::domain::{
    now_ms, Cluster, Exploration, ExplorationParameters, ExplorationStatus, ResultsSummary,
    Simulation, SimulationStatus,
};
use crate::error::{ExploreError, Result};

/// Pipeline phases that stamp a timestamp onto the exploration, each set once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ClustersFound,
    InputsGenerated,
    OptimizerFinished,
}

impl Phase {
    fn column(&self) -> &'static str {
        match self {
            Phase::ClustersFound => "clusters_found_at",
            Phase::InputsGenerated => "optimizer_inputs_generated_at",
            Phase::OptimizerFinished => "optimizer_finished_at",
        }
    }
}

/// SQLite-backed store for the exploration pipeline
pub struct ExplorationStore {
    conn: Mutex<Connection>,
}

impl ExplorationStore {
    /// Open (or create) the database in WAL mode and run the idempotent DDL
    /// migration.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating DB directory '{}'", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening SQLite '{}'", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("configuring SQLite PRAGMAs")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests and ephemeral runs
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory SQLite")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("configuring SQLite PRAGMAs")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS explorations (
                id                            TEXT PRIMARY KEY,
                consumer_count_min            INTEGER NOT NULL,
                diameter_max                  REAL NOT NULL,
                distance_from_grid_min        REAL NOT NULL,
                match_distance_max            REAL NOT NULL,
                clusters_found                INTEGER,
                minigrids_found               INTEGER,
                clusters_found_at             INTEGER,
                optimizer_inputs_generated_at INTEGER,
                optimizer_finished_at         INTEGER,
                status                        TEXT NOT NULL
                    CHECK (status IN ('RUNNING','FINISHED','ERROR','STOPPED')),
                created_at                    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clusters (
                id                     TEXT PRIMARY KEY,
                exploration_id         TEXT NOT NULL REFERENCES explorations(id),
                cluster_id             INTEGER NOT NULL,
                province               TEXT NOT NULL,
                num_buildings          INTEGER NOT NULL,
                distance_to_grid_m     REAL NOT NULL,
                avg_distance_to_road_m REAL NOT NULL,
                avg_surface            REAL NOT NULL,
                eps_meters             REAL NOT NULL,
                diameter_km            REAL NOT NULL,
                grid_distance_km       REAL NOT NULL,
                latitude               REAL NOT NULL,
                longitude              REAL NOT NULL,
                buildings_json         TEXT NOT NULL,
                lcoe                   REAL,
                capex                  REAL,
                res                    REAL,
                co2_savings            REAL,
                consumption_total      REAL,
                created_at             INTEGER NOT NULL,
                UNIQUE (exploration_id, cluster_id)
            );

            CREATE TABLE IF NOT EXISTS simulations (
                id             TEXT PRIMARY KEY,
                exploration_id TEXT NOT NULL REFERENCES explorations(id),
                cluster_id     INTEGER NOT NULL,
                grid_input     TEXT NOT NULL,
                supply_input   TEXT NOT NULL,
                grid_results   TEXT,
                supply_results TEXT,
                status         TEXT NOT NULL
                    CHECK (status IN ('PENDING','RUNNING','FINISHED','STOPPED',
                                      'ERROR','PROCESSED_ERROR','PROCESSED')),
                created_at     INTEGER NOT NULL,
                UNIQUE (exploration_id, cluster_id)
            );

            CREATE INDEX IF NOT EXISTS idx_simulations_status
                ON simulations(exploration_id, status);
            ",
            )
            .context("migrating SQLite schema")?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Explorations
    // ─────────────────────────────────────────────────────────────────────

    /// Create a new RUNNING exploration.
    ///
    /// Enforces the single-active-run invariant: fails with a Conflict if any
    /// exploration is currently RUNNING. Check and insert happen under one
    /// lock, so two concurrent starts cannot both succeed.
    pub fn create_exploration(&self, parameters: ExplorationParameters) -> Result<Exploration> {
        let conn = self.conn.lock();

        let running: Option<String> = conn
            .query_row(
                "SELECT id FROM explorations WHERE status = 'RUNNING' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = running {
            return Err(ExploreError::Conflict(format!(
                "exploration {id} is already running; stop it or wait until it finishes"
            )));
        }

        let exploration = Exploration::new(parameters);
        conn.execute(
            "INSERT INTO explorations
             (id, consumer_count_min, diameter_max, distance_from_grid_min, match_distance_max,
              status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                exploration.id.to_string(),
                exploration.parameters.consumer_count_min,
                exploration.parameters.diameter_max,
                exploration.parameters.distance_from_grid_min,
                exploration.parameters.match_distance_max,
                exploration.status.as_str(),
                exploration.created_at,
            ],
        )?;
        Ok(exploration)
    }

    pub fn get_exploration(&self, id: Uuid) -> Result<Option<Exploration>> {
        let conn = self.conn.lock();
        let exploration = conn
            .query_row(
                "SELECT id, consumer_count_min, diameter_max, distance_from_grid_min,
                        match_distance_max, clusters_found, minigrids_found, clusters_found_at,
                        optimizer_inputs_generated_at, optimizer_finished_at, status, created_at
                 FROM explorations WHERE id = ?1",
                params![id.to_string()],
                row_to_exploration,
            )
            .optional()?;
        Ok(exploration)
    }

    /// Current status of an exploration; this is the cooperative cancellation
    /// flag every worker polls.
    pub fn exploration_status(&self, id: Uuid) -> Result<ExplorationStatus> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM explorations WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            Some(s) => ExplorationStatus::parse(&s),
            None => Err(ExploreError::NotFound(format!("exploration {id}"))),
        }
    }

    /// Set clusters_found / minigrids_found, once, from the clustering result
    pub fn set_discovery_counts(
        &self,
        id: Uuid,
        clusters_found: i64,
        minigrids_found: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE explorations SET clusters_found = ?1, minigrids_found = ?2 WHERE id = ?3",
            params![clusters_found, minigrids_found, id.to_string()],
        )?;
        Ok(())
    }

    /// Stamp the timestamp of a completed pipeline phase
    pub fn stamp_phase(&self, id: Uuid, phase: Phase) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "UPDATE explorations SET {} = ?1 WHERE id = ?2",
                phase.column()
            ),
            params![now_ms(), id.to_string()],
        )?;
        Ok(())
    }

    /// Request cooperative cancellation. Fails with NotFound for an unknown
    /// id and Conflict (reporting the current status) when the exploration is
    /// not running.
    pub fn request_stop(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM explorations WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let status = status.ok_or_else(|| ExploreError::NotFound(format!("exploration {id}")))?;
        if status != "RUNNING" {
            return Err(ExploreError::Conflict(format!(
                "exploration {id} is not running (status: {status})"
            )));
        }
        conn.execute(
            "UPDATE explorations SET status = 'STOPPED' WHERE id = ?1 AND status = 'RUNNING'",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Record the terminal status computed by the orchestrator. The write is
    /// guarded on RUNNING so a STOPPED exploration is never overwritten.
    /// Returns whether the status was actually written.
    pub fn finalize(&self, id: Uuid, status: ExplorationStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE explorations SET status = ?1 WHERE id = ?2 AND status = 'RUNNING'",
            params![status.as_str(), id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Force the exploration into ERROR regardless of its current status.
    /// Used when a pipeline phase fails with a non-recoverable error.
    pub fn mark_error(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE explorations SET status = 'ERROR' WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Wipe all clusters and simulations of previous runs. Called before a
    /// new exploration starts; exploration records themselves are kept for
    /// history.
    pub fn reset_candidates(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM simulations", [])?;
        conn.execute("DELETE FROM clusters", [])?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Clusters
    // ─────────────────────────────────────────────────────────────────────

    pub fn insert_cluster(&self, cluster: &Cluster) -> Result<()> {
        let buildings_json = serde_json::to_string(&cluster.buildings)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO clusters
             (id, exploration_id, cluster_id, province, num_buildings, distance_to_grid_m,
              avg_distance_to_road_m, avg_surface, eps_meters, diameter_km, grid_distance_km,
              latitude, longitude, buildings_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                cluster.id.to_string(),
                cluster.exploration_id.to_string(),
                cluster.cluster_id,
                cluster.province,
                cluster.num_buildings,
                cluster.distance_to_grid_m,
                cluster.avg_distance_to_road_m,
                cluster.avg_surface,
                cluster.eps_meters,
                cluster.diameter_km,
                cluster.grid_distance_km,
                cluster.latitude,
                cluster.longitude,
                buildings_json,
                cluster.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_cluster(&self, exploration_id: Uuid, cluster_id: i64) -> Result<Option<Cluster>> {
        let conn = self.conn.lock();
        let cluster = conn
            .query_row(
                &format!("{CLUSTER_SELECT} WHERE exploration_id = ?1 AND cluster_id = ?2"),
                params![exploration_id.to_string(), cluster_id],
                row_to_cluster,
            )
            .optional()?;
        Ok(cluster)
    }

    pub fn list_clusters(&self, exploration_id: Uuid) -> Result<Vec<Cluster>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{CLUSTER_SELECT} WHERE exploration_id = ?1 ORDER BY cluster_id"
        ))?;
        let rows = stmt.query_map(params![exploration_id.to_string()], row_to_cluster)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Write the five result fields onto a cluster, exactly once. Only the
    /// result processor calls this.
    pub fn write_cluster_results(
        &self,
        exploration_id: Uuid,
        cluster_id: i64,
        summary: &ResultsSummary,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE clusters
             SET lcoe = ?1, capex = ?2, res = ?3, co2_savings = ?4, consumption_total = ?5
             WHERE exploration_id = ?6 AND cluster_id = ?7",
            params![
                summary.lcoe,
                summary.capex,
                summary.res,
                summary.co2_savings,
                summary.consumption_total,
                exploration_id.to_string(),
                cluster_id,
            ],
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Simulations
    // ─────────────────────────────────────────────────────────────────────

    /// Create a simulation with both inputs written atomically. Fails with a
    /// ConstraintViolation if a simulation for the same (exploration_id,
    /// cluster_id) pair already exists.
    pub fn create_simulation(&self, simulation: &Simulation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO simulations
             (id, exploration_id, cluster_id, grid_input, supply_input, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                simulation.id.to_string(),
                simulation.exploration_id.to_string(),
                simulation.cluster_id,
                simulation.grid_input,
                simulation.supply_input,
                simulation.status.as_str(),
                simulation.created_at,
            ],
        )
        .map_err(|e| map_unique_violation(e, simulation.exploration_id, simulation.cluster_id))?;
        Ok(())
    }

    pub fn get_simulation(&self, id: Uuid) -> Result<Option<Simulation>> {
        let conn = self.conn.lock();
        let simulation = conn
            .query_row(
                &format!("{SIMULATION_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                row_to_simulation,
            )
            .optional()?;
        Ok(simulation)
    }

    /// List simulations of one exploration holding any of the given statuses,
    /// oldest first.
    pub fn list_simulations(
        &self,
        exploration_id: Uuid,
        statuses: &[SimulationStatus],
        limit: Option<usize>,
    ) -> Result<Vec<Simulation>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "{SIMULATION_SELECT} WHERE exploration_id = ?1 AND status IN ({placeholders})
             ORDER BY created_at, cluster_id"
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(exploration_id.to_string())];
        for status in statuses {
            values.push(Box::new(status.as_str()));
        }
        let rows = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            row_to_simulation,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All simulations of one exploration, regardless of status
    pub fn all_simulations(&self, exploration_id: Uuid) -> Result<Vec<Simulation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SIMULATION_SELECT} WHERE exploration_id = ?1 ORDER BY created_at, cluster_id"
        ))?;
        let rows = stmt.query_map(params![exploration_id.to_string()], row_to_simulation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_simulation_status(&self, id: Uuid, status: SimulationStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE simulations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    /// Persist the grid sub-result. Write-once: the update is guarded on the
    /// column still being null. Returns whether the write happened.
    pub fn write_grid_results(&self, id: Uuid, results: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE simulations SET grid_results = ?1 WHERE id = ?2 AND grid_results IS NULL",
            params![results, id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Persist the supply sub-result, write-once like the grid counterpart
    pub fn write_supply_results(&self, id: Uuid, results: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE simulations SET supply_results = ?1 WHERE id = ?2 AND supply_results IS NULL",
            params![results, id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Count simulations of one exploration holding any of the given statuses
    pub fn count_by_status(
        &self,
        exploration_id: Uuid,
        statuses: &[SimulationStatus],
    ) -> Result<i64> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let placeholders = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM simulations
             WHERE exploration_id = ?1 AND status IN ({placeholders})"
        );

        let conn = self.conn.lock();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(exploration_id.to_string())];
        for status in statuses {
            values.push(Box::new(status.as_str()));
        }
        let count: i64 = conn.query_row(
            &sql,
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count all simulations of one exploration, regardless of status
    pub fn count_simulations(&self, exploration_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM simulations WHERE exploration_id = ?1",
            params![exploration_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

const CLUSTER_SELECT: &str = "SELECT id, exploration_id, cluster_id, province, num_buildings,
        distance_to_grid_m, avg_distance_to_road_m, avg_surface, eps_meters, diameter_km,
        grid_distance_km, latitude, longitude, buildings_json, lcoe, capex, res, co2_savings,
        consumption_total, created_at
 FROM clusters";

const SIMULATION_SELECT: &str = "SELECT id, exploration_id, cluster_id, grid_input, supply_input,
        grid_results, supply_results, status, created_at
 FROM simulations";

fn map_unique_violation(e: rusqlite::Error, exploration_id: Uuid, cluster_id: i64) -> ExploreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            return ExploreError::ConstraintViolation {
                exploration_id,
                cluster_id,
            };
        }
    }
    e.into()
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_exploration(row: &Row<'_>) -> rusqlite::Result<Exploration> {
    let status_text: String = row.get(10)?;
    let status = ExplorationStatus::parse(&status_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Exploration {
        id: uuid_column(row, 0)?,
        parameters: ExplorationParameters {
            consumer_count_min: row.get(1)?,
            diameter_max: row.get(2)?,
            distance_from_grid_min: row.get(3)?,
            match_distance_max: row.get(4)?,
        },
        clusters_found: row.get(5)?,
        minigrids_found: row.get(6)?,
        clusters_found_at: row.get(7)?,
        optimizer_inputs_generated_at: row.get(8)?,
        optimizer_finished_at: row.get(9)?,
        status,
        created_at: row.get(11)?,
    })
}

fn row_to_cluster(row: &Row<'_>) -> rusqlite::Result<Cluster> {
    let buildings_json: String = row.get(13)?;
    let buildings = serde_json::from_str(&buildings_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Cluster {
        id: uuid_column(row, 0)?,
        exploration_id: uuid_column(row, 1)?,
        cluster_id: row.get(2)?,
        province: row.get(3)?,
        num_buildings: row.get(4)?,
        distance_to_grid_m: row.get(5)?,
        avg_distance_to_road_m: row.get(6)?,
        avg_surface: row.get(7)?,
        eps_meters: row.get(8)?,
        diameter_km: row.get(9)?,
        grid_distance_km: row.get(10)?,
        latitude: row.get(11)?,
        longitude: row.get(12)?,
        buildings,
        results: ResultsSummary {
            lcoe: row.get(14)?,
            capex: row.get(15)?,
            res: row.get(16)?,
            co2_savings: row.get(17)?,
            consumption_total: row.get(18)?,
        },
        created_at: row.get(19)?,
    })
}

fn row_to_simulation(row: &Row<'_>) -> rusqlite::Result<Simulation> {
    let status_text: String = row.get(7)?;
    let status = SimulationStatus::parse(&status_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Simulation {
        id: uuid_column(row, 0)?,
        exploration_id: uuid_column(row, 1)?,
        cluster_id: row.get(2)?,
        grid_input: row.get(3)?,
        supply_input: row.get(4)?,
        grid_results: row.get(5)?,
        supply_results: row.get(6)?,
        status,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterBuilding, ClusterCandidate};

    fn temp_store() -> ExplorationStore {
        ExplorationStore::in_memory().expect("in-memory SQLite should open")
    }

    fn sample_candidate(cluster_id: i64) -> ClusterCandidate {
        ClusterCandidate {
            cluster_id,
            province: "Cabo Delgado".to_string(),
            num_buildings: 120,
            distance_to_grid_m: 65_000.0,
            avg_distance_to_road_m: 420.0,
            avg_surface: 38.5,
            eps_meters: 300.0,
            diameter_km: 5.0,
            grid_distance_km: 60.0,
            latitude: -12.97,
            longitude: 40.52,
            buildings: vec![ClusterBuilding {
                building_id: 1,
                building_type: "household".to_string(),
                surface: Some(40.0),
                latitude: -12.97,
                longitude: 40.52,
            }],
        }
    }

    #[test]
    fn test_file_backed_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("explorations.db");

        let exploration = {
            let store = ExplorationStore::open(&path).unwrap();
            let exploration = store
                .create_exploration(ExplorationParameters::default())
                .unwrap();
            let cluster = Cluster::from_candidate(exploration.id, sample_candidate(1));
            store.insert_cluster(&cluster).unwrap();
            exploration
        };

        // A fresh connection sees everything the first one wrote
        let store = ExplorationStore::open(&path).unwrap();
        let reloaded = store.get_exploration(exploration.id).unwrap().unwrap();
        assert_eq!(reloaded.status, ExplorationStatus::Running);
        assert_eq!(reloaded.parameters, exploration.parameters);
        assert_eq!(store.list_clusters(exploration.id).unwrap().len(), 1);
    }

    #[test]
    fn test_single_running_exploration() {
        let store = temp_store();
        let first = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        assert_eq!(first.status, ExplorationStatus::Running);

        let second = store.create_exploration(ExplorationParameters::default());
        assert!(matches!(second, Err(ExploreError::Conflict(_))));

        // After the first finishes, a new one may start
        assert!(store.finalize(first.id, ExplorationStatus::Finished).unwrap());
        assert!(store
            .create_exploration(ExplorationParameters::default())
            .is_ok());
    }

    #[test]
    fn test_duplicate_simulation_rejected() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();

        let sim = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        store.create_simulation(&sim).unwrap();

        let dup = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        let err = store.create_simulation(&dup).unwrap_err();
        assert!(matches!(
            err,
            ExploreError::ConstraintViolation { cluster_id: 1, .. }
        ));

        // A different cluster id is fine
        let other = Simulation::new(exploration.id, 2, "{}".into(), "{}".into());
        store.create_simulation(&other).unwrap();
    }

    #[test]
    fn test_status_filter_and_counts() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();

        for cluster_id in 0..3 {
            let sim = Simulation::new(exploration.id, cluster_id, "{}".into(), "{}".into());
            store.create_simulation(&sim).unwrap();
        }
        let pending = store
            .list_simulations(exploration.id, &[SimulationStatus::Pending], None)
            .unwrap();
        assert_eq!(pending.len(), 3);

        store
            .set_simulation_status(pending[0].id, SimulationStatus::Running)
            .unwrap();
        store
            .set_simulation_status(pending[1].id, SimulationStatus::Error)
            .unwrap();

        let still_pending = store
            .list_simulations(exploration.id, &[SimulationStatus::Pending], Some(5))
            .unwrap();
        assert_eq!(still_pending.len(), 1);

        let active = store
            .count_by_status(
                exploration.id,
                &[SimulationStatus::Pending, SimulationStatus::Running],
            )
            .unwrap();
        assert_eq!(active, 2);
    }

    #[test]
    fn test_result_writes_are_write_once() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let sim = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        store.create_simulation(&sim).unwrap();

        assert!(store.write_grid_results(sim.id, r#"{"cost_grid": 1}"#).unwrap());
        assert!(!store.write_grid_results(sim.id, r#"{"cost_grid": 2}"#).unwrap());

        let stored = store.get_simulation(sim.id).unwrap().unwrap();
        assert_eq!(stored.grid_results.as_deref(), Some(r#"{"cost_grid": 1}"#));
        assert!(stored.supply_results.is_none());
    }

    #[test]
    fn test_finalize_never_overwrites_stopped() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();

        store.request_stop(exploration.id).unwrap();
        assert!(!store
            .finalize(exploration.id, ExplorationStatus::Finished)
            .unwrap());
        assert_eq!(
            store.exploration_status(exploration.id).unwrap(),
            ExplorationStatus::Stopped
        );

        // Stopping again is a conflict, stopping an unknown id is NotFound
        assert!(matches!(
            store.request_stop(exploration.id),
            Err(ExploreError::Conflict(_))
        ));
        assert!(matches!(
            store.request_stop(Uuid::new_v4()),
            Err(ExploreError::NotFound(_))
        ));
    }

    #[test]
    fn test_cluster_results_round_trip() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let cluster = Cluster::from_candidate(exploration.id, sample_candidate(4));
        store.insert_cluster(&cluster).unwrap();

        let loaded = store.get_cluster(exploration.id, 4).unwrap().unwrap();
        assert_eq!(loaded.province, "Cabo Delgado");
        assert!(loaded.results.lcoe.is_none());

        let summary = ResultsSummary {
            lcoe: Some(0.42),
            capex: Some(185_000.0),
            res: Some(87.5),
            co2_savings: Some(120.0),
            consumption_total: Some(96_000.0),
        };
        store
            .write_cluster_results(exploration.id, 4, &summary)
            .unwrap();
        let loaded = store.get_cluster(exploration.id, 4).unwrap().unwrap();
        assert_eq!(loaded.results, summary);
    }

    #[test]
    fn test_reset_candidates_keeps_explorations() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        let cluster = Cluster::from_candidate(exploration.id, sample_candidate(1));
        store.insert_cluster(&cluster).unwrap();
        let sim = Simulation::new(exploration.id, 1, "{}".into(), "{}".into());
        store.create_simulation(&sim).unwrap();

        store.reset_candidates().unwrap();
        assert!(store.list_clusters(exploration.id).unwrap().is_empty());
        assert!(store.all_simulations(exploration.id).unwrap().is_empty());
        assert!(store.get_exploration(exploration.id).unwrap().is_some());
    }

    #[test]
    fn test_phase_stamps() {
        let store = temp_store();
        let exploration = store
            .create_exploration(ExplorationParameters::default())
            .unwrap();
        store.stamp_phase(exploration.id, Phase::ClustersFound).unwrap();
        store
            .stamp_phase(exploration.id, Phase::OptimizerFinished)
            .unwrap();

        let loaded = store.get_exploration(exploration.id).unwrap().unwrap();
        assert!(loaded.clusters_found_at.is_some());
        assert!(loaded.optimizer_inputs_generated_at.is_none());
        assert!(loaded.optimizer_finished_at.is_some());
    }
}
