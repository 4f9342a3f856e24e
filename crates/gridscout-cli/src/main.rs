use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use gridscout_core::{
    BuildingSite, Collaborators, DbscanClusterSource, EngineConfig, ExistingMinigrid,
    ExplorationEngine, ExplorationParameters, ExplorationStore, FinancialSummarizer,
    HttpOptimizerGateway, ProfileInputSynthesizer,
};

/// Gridscout - minigrid site exploration engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the exploration database
    #[arg(long, value_name = "FILE", default_value = "gridscout.db")]
    db: PathBuf,

    /// Base URL of the offgrid optimizer service
    #[arg(long, value_name = "URL", default_value = "http://localhost:8008")]
    optimizer_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an exploration over a building catalogue and follow it to the end
    Run {
        /// JSON file with the building catalogue
        #[arg(long, value_name = "FILE")]
        sites: PathBuf,

        /// JSON file with already operating minigrids
        #[arg(long, value_name = "FILE")]
        minigrids: Option<PathBuf>,

        /// Concurrent optimizations in flight
        #[arg(long, default_value_t = gridscout_core::DEFAULT_SLOTS)]
        slots: usize,

        /// Minimum consumers per cluster
        #[arg(long, default_value_t = 100)]
        consumer_count_min: u32,

        /// Maximum cluster diameter, meters
        #[arg(long, default_value_t = 5000.0)]
        diameter_max: f64,

        /// Minimum distance from the national grid, meters
        #[arg(long, default_value_t = 60000.0)]
        distance_from_grid_min: f64,

        /// Filter radius around existing minigrids, meters
        #[arg(long, default_value_t = 5000.0)]
        match_distance_max: f64,

        /// Print the final progress snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the progress of an exploration
    Progress {
        exploration_id: Uuid,

        /// Output in JSON for integrations
        #[arg(long)]
        json: bool,
    },

    /// Request a cooperative stop of a running exploration
    Stop { exploration_id: Uuid },
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("could not read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

fn build_engine(
    cli: &Cli,
    slots: usize,
    sites: Vec<BuildingSite>,
    minigrids: Vec<ExistingMinigrid>,
) -> anyhow::Result<(ExplorationEngine, Arc<ExplorationStore>)> {
    let config = Arc::new(
        EngineConfig::new()
            .with_db_path(cli.db.display().to_string())
            .with_optimizer_url(cli.optimizer_url.clone())
            .with_slots(slots),
    );
    let store = Arc::new(ExplorationStore::open(&cli.db)?);
    let collaborators = Collaborators {
        cluster_source: Arc::new(DbscanClusterSource::new(sites, minigrids)),
        input_synthesizer: Arc::new(ProfileInputSynthesizer::new()),
        optimizer: Arc::new(HttpOptimizerGateway::new(&config)?),
        summarizer: Arc::new(FinancialSummarizer::new()),
    };
    Ok((
        ExplorationEngine::new(store.clone(), config, collaborators),
        store,
    ))
}

fn print_progress(progress: &gridscout_core::ExplorationProgress, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(progress)?);
    } else {
        println!("exploration {}", progress.exploration_id);
        println!("  status:     {}", progress.status.as_str());
        println!(
            "  clusters:   {}",
            progress
                .clusters_found
                .map_or("-".to_string(), |n| n.to_string())
        );
        println!(
            "  minigrids:  {}",
            progress
                .minigrids_found
                .map_or("-".to_string(), |n| n.to_string())
        );
        println!(
            "  analyzed:   {} ({} calculated, {} aborted)",
            progress.minigrids_analyzed, progress.minigrids_calculated, progress.minigrids_aborted
        );
        println!(
            "  elapsed:    {}s of ~{}s",
            progress.elapsed_ms / 1000,
            progress.estimated_duration_ms / 1000
        );
        for cluster in &progress.results {
            println!(
                "  cluster {:>3}  {} buildings  lcoe {:.2} ct/kWh  capex {:.0} USD",
                cluster.cluster_id,
                cluster.num_buildings,
                cluster.results.lcoe.unwrap_or(f64::NAN),
                cluster.results.capex.unwrap_or(f64::NAN),
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridscout=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            sites,
            minigrids,
            slots,
            consumer_count_min,
            diameter_max,
            distance_from_grid_min,
            match_distance_max,
            json,
        } => {
            let catalogue: Vec<BuildingSite> = load_json(sites)?;
            let existing: Vec<ExistingMinigrid> = match minigrids {
                Some(path) => load_json(path)?,
                None => Vec::new(),
            };
            tracing::info!(
                sites = catalogue.len(),
                existing_minigrids = existing.len(),
                "catalogue loaded"
            );

            let (engine, _store) = build_engine(&cli, *slots, catalogue, existing)?;
            let exploration_id = engine.start(ExplorationParameters {
                consumer_count_min: *consumer_count_min,
                diameter_max: *diameter_max,
                distance_from_grid_min: *distance_from_grid_min,
                match_distance_max: *match_distance_max,
            })?;
            println!("exploration {exploration_id} started");

            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let progress = engine.progress(exploration_id)?;
                if progress.status.is_terminal() {
                    print_progress(&progress, *json)?;
                    break;
                }
                tracing::info!(
                    status = progress.status.as_str(),
                    analyzed = progress.minigrids_analyzed,
                    found = ?progress.minigrids_found,
                    "exploration running"
                );
            }
        }
        Commands::Progress {
            exploration_id,
            json,
        } => {
            let (engine, _store) = build_engine(&cli, gridscout_core::DEFAULT_SLOTS, vec![], vec![])?;
            let progress = engine.progress(*exploration_id)?;
            print_progress(&progress, *json)?;
        }
        Commands::Stop { exploration_id } => {
            let (_engine, store) = build_engine(&cli, gridscout_core::DEFAULT_SLOTS, vec![], vec![])?;
            store.request_stop(*exploration_id)?;
            println!("stop requested for exploration {exploration_id}");
        }
    }

    Ok(())
}
