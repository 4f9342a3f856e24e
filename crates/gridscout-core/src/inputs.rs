//! Synthesis of the grid and supply optimizer inputs for one cluster.
//!
//! The grid input carries the cluster's buildings as consumer nodes plus a
//! power-house node at the centroid, together with the component cost table.
//! The supply input carries a synthetic hourly demand profile (a daily shape
//! scaled by the consumer mix, with small seeded per-day noise) and a solar
//! potential curve over the same index.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::Cluster;
use crate::error::Result;
use crate::payload::{
    ComponentParameters, ComponentSettings, ConsumerDetail, ConsumerType, EnergySystemDesign,
    GridDesign, GridDesignComponent, GridInput, HowAdded, NodeAttributes, NodeType, SequenceIndex,
    Sequences, Shortage, ShortageParameters, ShortageSettings, SupplyComponent, SupplyInput,
};

/// Baseline daily consumption per household, kWh
const HOUSEHOLD_KWH_PER_DAY: f64 = 1.9;

/// Baseline daily consumption for non-household buildings, kWh
const NON_HOUSEHOLD_KWH_PER_DAY: f64 = 12.5;

/// Peak solar potential per installed kW, kWh per hour at noon
const SOLAR_PEAK: f64 = 0.85;

/// Fraction of one day's demand drawn in each hour, evening-peaked
const HOURLY_DEMAND_SHAPE: [f64; 24] = [
    0.015, 0.012, 0.010, 0.010, 0.012, 0.025, 0.045, 0.050, 0.045, 0.040, 0.038, 0.040, //
    0.042, 0.040, 0.038, 0.040, 0.045, 0.060, 0.085, 0.095, 0.090, 0.070, 0.040, 0.023,
];

/// Per-cluster input generation collaborator
#[async_trait]
pub trait InputSynthesizer: Send + Sync {
    async fn generate(&self, cluster: &Cluster) -> Result<(GridInput, SupplyInput)>;
}

/// Default [`InputSynthesizer`] producing profile-based inputs
pub struct ProfileInputSynthesizer {
    n_days: u32,
}

impl Default for ProfileInputSynthesizer {
    fn default() -> Self {
        Self { n_days: 365 }
    }
}

impl ProfileInputSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shrink the simulated horizon, mainly for tests and quick runs
    pub fn with_n_days(mut self, n_days: u32) -> Self {
        self.n_days = n_days.max(1);
        self
    }

    fn build_nodes(cluster: &Cluster) -> NodeAttributes {
        let mut nodes = NodeAttributes::default();
        for building in &cluster.buildings {
            let key = building.building_id.to_string();
            let consumer_type = if building.building_type == "household" {
                ConsumerType::Household
            } else {
                ConsumerType::NotApplicable
            };
            let consumer_detail = if consumer_type == ConsumerType::Household {
                ConsumerDetail::Default
            } else {
                ConsumerDetail::NotApplicable
            };
            nodes.latitude.insert(key.clone(), building.latitude);
            nodes.longitude.insert(key.clone(), building.longitude);
            nodes.how_added.insert(key.clone(), HowAdded::Automatic);
            nodes.node_type.insert(key.clone(), NodeType::Consumer);
            nodes.consumer_type.insert(key.clone(), consumer_type);
            nodes.custom_specification.insert(key.clone(), String::new());
            nodes.shs_options.insert(key.clone(), 0);
            nodes.consumer_detail.insert(key.clone(), consumer_detail);
            nodes.is_connected.insert(key, true);
        }

        // Power house at the centroid, keyed past the highest building id
        let power_house_id = cluster
            .buildings
            .iter()
            .map(|b| b.building_id)
            .max()
            .unwrap_or(0)
            + 1;
        let key = power_house_id.to_string();
        nodes.latitude.insert(key.clone(), cluster.latitude);
        nodes.longitude.insert(key.clone(), cluster.longitude);
        nodes.how_added.insert(key.clone(), HowAdded::Automatic);
        nodes.node_type.insert(key.clone(), NodeType::PowerHouse);
        nodes
            .consumer_type
            .insert(key.clone(), ConsumerType::NotApplicable);
        nodes.custom_specification.insert(key.clone(), String::new());
        nodes.shs_options.insert(key.clone(), 0);
        nodes
            .consumer_detail
            .insert(key.clone(), ConsumerDetail::NotApplicable);
        nodes.is_connected.insert(key, true);
        nodes
    }

    fn grid_design() -> GridDesign {
        GridDesign {
            distribution_cable: GridDesignComponent {
                capex: Some(10.0),
                max_length: Some(50.0),
                lifetime: Some(25.0),
                ..Default::default()
            },
            connection_cable: GridDesignComponent {
                capex: Some(4.0),
                max_length: Some(20.0),
                lifetime: Some(25.0),
                ..Default::default()
            },
            pole: GridDesignComponent {
                capex: Some(800.0),
                max_n_connections: Some(5),
                lifetime: Some(25.0),
                ..Default::default()
            },
            mg: GridDesignComponent {
                connection_cost: Some(140.0),
                lifetime: Some(25.0),
                ..Default::default()
            },
            shs: GridDesignComponent {
                include: Some(false),
                max_grid_cost: Some(0.6),
                ..Default::default()
            },
        }
    }

    fn energy_system_design() -> EnergySystemDesign {
        let selected = ComponentSettings {
            is_selected: true,
            design: true,
        };
        EnergySystemDesign {
            battery: SupplyComponent {
                settings: selected.clone(),
                parameters: ComponentParameters {
                    soc_min: Some(0.3),
                    soc_max: Some(1.0),
                    c_rate_in: Some(1.0),
                    c_rate_out: Some(1.0),
                    efficiency: Some(0.95),
                    capex: Some(350.0),
                    opex: Some(7.0),
                    lifetime: Some(6.0),
                    ..Default::default()
                },
            },
            diesel_genset: SupplyComponent {
                settings: selected.clone(),
                parameters: ComponentParameters {
                    variable_cost: Some(0.045),
                    fuel_cost: Some(1.21),
                    fuel_lhv: Some(11.83),
                    min_load: Some(0.3),
                    max_load: Some(1.0),
                    min_efficiency: Some(0.2),
                    max_efficiency: Some(0.33),
                    capex: Some(250.0),
                    opex: Some(12.5),
                    lifetime: Some(8.0),
                    ..Default::default()
                },
            },
            inverter: SupplyComponent {
                settings: selected.clone(),
                parameters: ComponentParameters {
                    efficiency: Some(0.95),
                    capex: Some(400.0),
                    opex: Some(8.0),
                    lifetime: Some(10.0),
                    ..Default::default()
                },
            },
            pv: SupplyComponent {
                settings: selected.clone(),
                parameters: ComponentParameters {
                    capex: Some(450.0),
                    opex: Some(9.0),
                    lifetime: Some(25.0),
                    ..Default::default()
                },
            },
            rectifier: SupplyComponent {
                settings: selected,
                parameters: ComponentParameters {
                    efficiency: Some(0.95),
                    capex: Some(400.0),
                    opex: Some(8.0),
                    lifetime: Some(10.0),
                    ..Default::default()
                },
            },
            shortage: Shortage {
                settings: ShortageSettings { is_selected: true },
                parameters: ShortageParameters {
                    max_shortage_total: 0.1,
                    max_shortage_timestep: 0.5,
                    shortage_penalty_cost: 0.3,
                },
            },
        }
    }

    /// Daily demand of the whole cluster, kWh
    fn daily_demand_kwh(cluster: &Cluster) -> f64 {
        cluster
            .buildings
            .iter()
            .map(|b| {
                if b.building_type == "household" {
                    HOUSEHOLD_KWH_PER_DAY
                } else {
                    NON_HOUSEHOLD_KWH_PER_DAY
                }
            })
            .sum()
    }

    fn build_sequences(&self, cluster: &Cluster) -> Sequences {
        let daily_kwh = Self::daily_demand_kwh(cluster);
        // Seeded per cluster so regeneration is reproducible
        let mut rng = StdRng::seed_from_u64(cluster.cluster_id as u64);

        let hours = 24 * self.n_days as usize;
        let mut demand = Vec::with_capacity(hours);
        let mut solar_potential = Vec::with_capacity(hours);
        for day in 0..self.n_days {
            let day_factor: f64 = 1.0 + rng.gen_range(-0.05..0.05);
            for hour in 0..24usize {
                demand.push(daily_kwh * HOURLY_DEMAND_SHAPE[hour] * day_factor);

                // Seasonal and diurnal solar curve, zero outside daylight
                let diurnal = (std::f64::consts::PI * (hour as f64 - 6.0) / 12.0).sin();
                let seasonal =
                    1.0 - 0.15 * (2.0 * std::f64::consts::PI * day as f64 / 365.0).cos();
                solar_potential.push((SOLAR_PEAK * diurnal * seasonal).max(0.0));
            }
        }

        let start_date = format!("{}-01-01T00:00:00", Utc::now().year());
        Sequences {
            index: SequenceIndex::hourly(start_date, self.n_days),
            demand,
            solar_potential,
        }
    }
}

#[async_trait]
impl InputSynthesizer for ProfileInputSynthesizer {
    async fn generate(&self, cluster: &Cluster) -> Result<(GridInput, SupplyInput)> {
        let sequences = self.build_sequences(cluster);
        sequences.validate()?;
        let yearly_demand = sequences.demand.iter().sum::<f64>() * 365.0 / self.n_days as f64;

        let grid_input = GridInput {
            nodes: Self::build_nodes(cluster),
            grid_design: Self::grid_design(),
            yearly_demand,
        };
        grid_input.nodes.validate()?;

        let supply_input = SupplyInput {
            sequences,
            energy_system_design: Self::energy_system_design(),
        };
        Ok((grid_input, supply_input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterBuilding, ClusterCandidate};
    use uuid::Uuid;

    fn sample_cluster() -> Cluster {
        let buildings = vec![
            ClusterBuilding {
                building_id: 10,
                building_type: "household".to_string(),
                surface: Some(35.0),
                latitude: -12.900,
                longitude: 40.500,
            },
            ClusterBuilding {
                building_id: 11,
                building_type: "school".to_string(),
                surface: Some(120.0),
                latitude: -12.901,
                longitude: 40.501,
            },
        ];
        Cluster::from_candidate(
            Uuid::new_v4(),
            ClusterCandidate {
                cluster_id: 3,
                province: "Cabo Delgado".to_string(),
                num_buildings: buildings.len() as i64,
                distance_to_grid_m: 65_000.0,
                avg_distance_to_road_m: 400.0,
                avg_surface: 77.5,
                eps_meters: 300.0,
                diameter_km: 5.0,
                grid_distance_km: 60.0,
                latitude: -12.9005,
                longitude: 40.5005,
                buildings,
            },
        )
    }

    #[tokio::test]
    async fn test_nodes_include_every_building_and_a_power_house() {
        let (grid_input, _) = ProfileInputSynthesizer::new()
            .with_n_days(2)
            .generate(&sample_cluster())
            .await
            .unwrap();

        assert_eq!(grid_input.nodes.node_count(), 3);
        assert!(grid_input.nodes.validate().is_ok());
        assert_eq!(
            grid_input.nodes.node_type.get("12"),
            Some(&NodeType::PowerHouse)
        );
        assert_eq!(
            grid_input.nodes.consumer_type.get("10"),
            Some(&ConsumerType::Household)
        );
        assert_eq!(
            grid_input.nodes.consumer_type.get("11"),
            Some(&ConsumerType::NotApplicable)
        );
    }

    #[tokio::test]
    async fn test_sequences_span_the_horizon() {
        let (_, supply_input) = ProfileInputSynthesizer::new()
            .with_n_days(3)
            .generate(&sample_cluster())
            .await
            .unwrap();

        assert_eq!(supply_input.sequences.demand.len(), 72);
        assert_eq!(supply_input.sequences.solar_potential.len(), 72);
        assert!(supply_input.sequences.validate().is_ok());
        assert!(supply_input.sequences.demand.iter().all(|d| *d > 0.0));
        assert!(supply_input
            .sequences
            .solar_potential
            .iter()
            .all(|s| *s >= 0.0));
        // Night hours have no solar potential
        assert_eq!(supply_input.sequences.solar_potential[0], 0.0);
    }

    #[tokio::test]
    async fn test_generation_is_reproducible() {
        let synthesizer = ProfileInputSynthesizer::new().with_n_days(2);
        let cluster = sample_cluster();
        let (_, first) = synthesizer.generate(&cluster).await.unwrap();
        let (_, second) = synthesizer.generate(&cluster).await.unwrap();
        assert_eq!(first.sequences.demand, second.sequences.demand);
    }

    #[tokio::test]
    async fn test_yearly_demand_scales_to_a_full_year() {
        let (grid_input, supply_input) = ProfileInputSynthesizer::new()
            .with_n_days(2)
            .generate(&sample_cluster())
            .await
            .unwrap();
        let horizon_sum: f64 = supply_input.sequences.demand.iter().sum();
        assert!((grid_input.yearly_demand - horizon_sum * 365.0 / 2.0).abs() < 1e-6);
    }
}
