//! gridscout-core - Minigrid Exploration Orchestration Engine
//!
//! This crate discovers candidate minigrid sites from building data and
//! drives each candidate through an external energy-system optimization,
//! producing a financial summary per site.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   ExplorationEngine                      │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌────────────────┐   clusters                           │
//! │  │ Cluster Finder ├──────────────┐                       │
//! │  └────────────────┘              │                       │
//! │  ┌─────────────────┐  PENDING    │                       │
//! │  │ Input Generator ├───────┐     │                       │
//! │  └─────────────────┘       │     │                       │
//! │  ┌─────────────────┐  ┌────▼─────▼────────┐              │
//! │  │    Scheduler    ├──┤ Simulation Store  │              │
//! │  └───────┬─────────┘  │     (SQLite)      │              │
//! │  ┌───────▼─────────┐  └────▲──────────────┘              │
//! │  │ Result Processor├───────┘                             │
//! │  └─────────────────┘                                     │
//! │          │                                               │
//! │  ┌───────▼──────────────┐                                │
//! │  │  Optimizer Gateway   │──► grid + supply HTTP services │
//! │  └──────────────────────┘                                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The four workers coordinate exclusively through the store: no channels,
//! no shared in-memory queues. A stop request flips one persisted flag that
//! every worker polls at its checkpoints.
//!
//! # Features
//!
//! - **DBSCAN site discovery**: density clustering with diameter, road,
//!   grid-distance and existing-minigrid filters
//! - **Bounded-concurrency scheduling**: a fixed number of slots paces the
//!   paired grid/supply optimizations
//! - **Cooperative cancellation**: one persisted STOPPED flag, polled
//! - **Financial post-processing**: LCOE, CAPEX, renewable share and CO2
//!   savings per candidate

pub mod clustering;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod inputs;
pub mod orchestrator;
pub mod payload;
pub mod results;
pub mod store;
pub mod workers;

pub use clustering::{BuildingSite, ClusterSource, DbscanClusterSource, ExistingMinigrid};
pub use config::{EngineConfig, DEFAULT_SLOTS};
pub use domain::{
    Cluster, ClusteringOutcome, Exploration, ExplorationParameters, ExplorationStatus,
    ResultsSummary, Simulation, SimulationStatus,
};
pub use engine::{ExplorationEngine, ExplorationProgress, MinigridDetail};
pub use error::{ExploreError, GatewayError, Result};
pub use gateway::{HttpOptimizerGateway, Optimizer, OptimizerKind, PollHandle, PollOutcome};
pub use inputs::{InputSynthesizer, ProfileInputSynthesizer};
pub use orchestrator::{run_exploration, Collaborators};
pub use payload::{GridInput, SupplyInput};
pub use results::{FinancialSummarizer, ResultsSummarizer};
pub use store::{ExplorationStore, Phase};
