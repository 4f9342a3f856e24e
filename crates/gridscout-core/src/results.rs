//! Financial and energy summary computed from a finished simulation's inputs
//! and the two optimizer result documents.
//!
//! Costs are annualized over the project lifetime with a capital recovery
//! factor (CRF) and each component's equivalent periodical cost (EPC), which
//! accounts for replacement investments when a component's lifetime is
//! shorter than the project's. All float reads from the result documents go
//! through [`parse_float`] so the sentinel encoding of non-finite values is
//! honored; missing or non-finite pieces degrade the corresponding summary
//! fields to None instead of failing the simulation.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::domain::ResultsSummary;
use crate::error::Result;
use crate::payload::{parse_float, GridInput, SupplyInput};

/// Diesel fuel density, kg per liter
const FUEL_DENSITY_DIESEL: f64 = 0.846;

/// CO2 emission factor by genset size, kg CO2 per kWh
fn co2_emission_factor(genset_capacity_kw: f64) -> f64 {
    if genset_capacity_kw < 60.0 {
        1.580
    } else if genset_capacity_kw < 300.0 {
        0.883
    } else {
        0.699
    }
}

/// Results-computation collaborator invoked per finished simulation
#[async_trait]
pub trait ResultsSummarizer: Send + Sync {
    async fn summarize(
        &self,
        grid_input: &str,
        grid_results: Option<&str>,
        supply_input: &str,
        supply_results: Option<&str>,
    ) -> Result<ResultsSummary>;
}

/// Default [`ResultsSummarizer`] based on annualized component costs
pub struct FinancialSummarizer {
    /// Percent, e.g. 5.0
    interest_rate: f64,
    tax: f64,
    /// Project lifetime in years
    lifetime: f64,
}

impl Default for FinancialSummarizer {
    fn default() -> Self {
        Self {
            interest_rate: 5.0,
            tax: 0.18,
            lifetime: 20.0,
        }
    }
}

impl FinancialSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn wacc(&self) -> f64 {
        self.interest_rate / 100.0
    }

    /// Capital recovery factor over the project lifetime
    fn crf(&self) -> f64 {
        let wacc = self.wacc();
        (wacc * (1.0 + wacc).powf(self.lifetime)) / ((1.0 + wacc).powf(self.lifetime) - 1.0)
    }

    /// Equivalent CAPEX including replacement investments and salvage value
    /// for components outliving or outlived by the project
    fn capex_multi_investment(&self, capex_0: f64, component_lifetime: f64) -> f64 {
        let wacc = self.wacc();
        let n_investments = if (self.lifetime - component_lifetime).abs() < f64::EPSILON {
            1
        } else {
            (self.lifetime / component_lifetime + 0.5).round() as i64
        };
        let first_investment = capex_0 * (1.0 + self.tax);
        let mut capex = first_investment;
        for replacement in 1..n_investments {
            let at_year = replacement as f64 * component_lifetime;
            if (at_year - self.lifetime).abs() > f64::EPSILON {
                capex += first_investment / (1.0 + wacc).powf(at_year);
            }
        }
        let total_span = n_investments as f64 * component_lifetime;
        if total_span > self.lifetime {
            let last_investment =
                first_investment / (1.0 + wacc).powf((n_investments - 1) as f64 * component_lifetime);
            let linear_depreciation = last_investment / component_lifetime;
            capex -= linear_depreciation * (total_span - self.lifetime)
                / (1.0 + wacc).powf(self.lifetime);
        }
        capex
    }

    /// Annualized per-unit cost of one component
    fn epc(&self, capex: f64, opex: f64, component_lifetime: f64, n_days: f64) -> f64 {
        (self.crf() * self.capex_multi_investment(capex, component_lifetime) + opex) / n_days
            * 365.0
    }

    /// EPC-based cost of the discovered grid layout, from the grid optimizer
    /// result's node and link tables. None when the layout is unusable.
    fn grid_cost(&self, grid_input: &GridInput, grid_results: &Value, n_days: f64) -> Option<f64> {
        let design = &grid_input.grid_design;
        let pole_epc = self.epc(design.pole.capex?, 0.0, design.pole.lifetime?, n_days);
        let dist_epc = self.epc(
            design.distribution_cable.capex?,
            0.0,
            design.distribution_cable.lifetime?,
            n_days,
        );
        let conn_epc = self.epc(
            design.connection_cable.capex?,
            0.0,
            design.connection_cable.lifetime?,
            n_days,
        );
        let mg_epc = self.epc(design.mg.connection_cost?, 0.0, self.lifetime, n_days);

        let nodes = column_table(grid_results.get("nodes")?)?;
        let links = column_table(grid_results.get("links")?)?;

        let node_types = nodes.get("node_type")?.as_object()?;
        let is_connected = nodes.get("is_connected")?.as_object()?;
        let n_poles = node_types
            .values()
            .filter(|t| t.as_str() == Some("pole") || t.as_str() == Some("power-house"))
            .count() as f64;
        let n_consumers = node_types
            .values()
            .filter(|t| t.as_str() == Some("consumer"))
            .count() as f64;
        let n_shs = is_connected
            .values()
            .filter(|c| c.as_bool() == Some(false))
            .count() as f64;
        let n_mg_consumers = n_consumers - n_shs;

        let link_types = links.get("link_type")?.as_object()?;
        let lengths = links.get("length")?.as_object()?;
        let mut dist_len = 0.0;
        let mut conn_len = 0.0;
        for (key, link_type) in link_types {
            let length = lengths.get(key).and_then(parse_float)?;
            match link_type.as_str() {
                Some("distribution") => dist_len += length,
                Some("connection") => conn_len += length,
                _ => {}
            }
        }

        if n_poles == 0.0 || link_types.is_empty() {
            return Some(0.0);
        }
        Some(
            n_poles * pole_epc
                + n_mg_consumers * mg_epc
                + conn_len * conn_epc
                + dist_len * dist_epc,
        )
    }

    fn summarize_inner(
        &self,
        grid_input: &str,
        grid_results: Option<&str>,
        supply_input: &str,
        supply_results: Option<&str>,
    ) -> Result<ResultsSummary> {
        let grid_input: GridInput = GridInput::from_payload(&serde_json::from_str(grid_input)?)?;
        let supply_input: SupplyInput =
            SupplyInput::from_payload(&serde_json::from_str(supply_input)?)?;
        let grid_results: Option<Value> = grid_results.map(serde_json::from_str).transpose()?;
        let supply_results: Option<Value> = supply_results.map(serde_json::from_str).transpose()?;

        let n_days = supply_input.sequences.index.n_days.max(1) as f64;
        let annualize = |v: f64| v / n_days * 365.0;

        let cost_grid = grid_results
            .as_ref()
            .and_then(|results| self.grid_cost(&grid_input, results, n_days))
            .map(annualize);

        let supply = match &supply_results {
            Some(results) => self.supply_figures(&supply_input, results, n_days),
            None => None,
        };

        let Some(supply) = supply else {
            debug!("supply figures unavailable, emitting a grid-only summary");
            return Ok(ResultsSummary {
                capex: cost_grid,
                ..Default::default()
            });
        };

        let total_demand: f64 = supply_input.sequences.demand.iter().sum();
        let demand_full_year: f64 = annualize(total_demand);

        let lcoe = if total_demand > 0.0 {
            Some(
                100.0 * (supply.total_revenue + cost_grid.unwrap_or(0.0)) / total_demand,
            )
        } else {
            None
        };
        let capex = Some(
            cost_grid.unwrap_or(0.0) + supply.cost_renewable + supply.cost_non_renewable,
        );
        let res = if supply.pv_sum + supply.genset_sum > 0.0 {
            Some(100.0 * supply.pv_sum / (supply.pv_sum + supply.genset_sum))
        } else {
            None
        };
        let emission_factor = co2_emission_factor(supply.genset_capacity);
        let co2_savings =
            Some(annualize((total_demand - supply.genset_sum) * emission_factor / 1_000.0));
        let shortage_share = if total_demand > 0.0 {
            100.0 * supply.shortage_sum / total_demand
        } else {
            0.0
        };
        let consumption_total = Some(demand_full_year * (100.0 - shortage_share) / 100.0);

        Ok(ResultsSummary {
            lcoe,
            capex,
            res,
            co2_savings,
            consumption_total,
        })
    }

    /// Annualized supply-side cost and energy figures
    fn supply_figures(
        &self,
        supply_input: &SupplyInput,
        supply_results: &Value,
        n_days: f64,
    ) -> Option<SupplyFigures> {
        let annualize = |v: f64| v / n_days * 365.0;
        let design = &supply_input.energy_system_design;

        let capacity = |component: &crate::payload::SupplyComponent, key: &str| -> Option<f64> {
            if !component.settings.is_selected {
                return Some(0.0);
            }
            if component.settings.design {
                scalar(supply_results, key, "invest")
            } else {
                Some(component.parameters.nominal_capacity.unwrap_or(0.0))
            }
        };

        let pv_capacity = capacity(&design.pv, "pv__electricity_dc")?;
        let battery_capacity = capacity(&design.battery, "electricity_dc__battery")?;
        let inverter_capacity = capacity(&design.inverter, "electricity_dc__inverter")?;
        let rectifier_capacity = capacity(&design.rectifier, "electricity_ac__rectifier")?;
        let genset_capacity = capacity(&design.diesel_genset, "diesel_genset__electricity_ac")?;

        let pv_sum = sequence_sum(supply_results, "pv__electricity_dc")?;
        let genset_sum = sequence_sum(supply_results, "diesel_genset__electricity_ac")?;
        let shortage_sum = sequence_sum(supply_results, "shortage__electricity_ac").unwrap_or(0.0);
        let fuel_kwh = sequence_sum(supply_results, "fuel_source__fuel")?;

        let component_epc = |c: &crate::payload::SupplyComponent| -> Option<f64> {
            Some(self.epc(
                c.parameters.capex?,
                c.parameters.opex?,
                c.parameters.lifetime?,
                n_days,
            ))
        };

        let cost_renewable = annualize(
            component_epc(&design.pv)? * pv_capacity
                + component_epc(&design.inverter)? * inverter_capacity
                + component_epc(&design.battery)? * battery_capacity,
        );
        let variable_cost = design.diesel_genset.parameters.variable_cost.unwrap_or(0.0);
        let cost_non_renewable = annualize(
            component_epc(&design.diesel_genset)? * genset_capacity
                + component_epc(&design.rectifier)? * rectifier_capacity,
        ) + variable_cost * genset_sum;

        let fuel_lhv = design.diesel_genset.parameters.fuel_lhv?;
        let fuel_liters = fuel_kwh / fuel_lhv / FUEL_DENSITY_DIESEL;
        let fuel_cost = design.diesel_genset.parameters.fuel_cost.unwrap_or(0.0);
        let total_fuel = fuel_cost * fuel_liters;

        Some(SupplyFigures {
            total_revenue: cost_renewable + cost_non_renewable + total_fuel,
            cost_renewable,
            cost_non_renewable,
            pv_sum,
            genset_sum,
            shortage_sum,
            genset_capacity,
        })
    }
}

struct SupplyFigures {
    total_revenue: f64,
    cost_renewable: f64,
    cost_non_renewable: f64,
    pv_sum: f64,
    genset_sum: f64,
    shortage_sum: f64,
    genset_capacity: f64,
}

/// A columnar table that may arrive stringified inside the outer document
fn column_table(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}

/// Read one scalar of a result item; scalars may arrive stringified
fn scalar(results: &Value, key: &str, name: &str) -> Option<f64> {
    let scalars = results.get(key)?.get("scalars")?;
    let scalars = match scalars {
        Value::String(s) => serde_json::from_str::<Value>(s).ok()?,
        other => other.clone(),
    };
    parse_float(scalars.get(name)?).filter(|f| f.is_finite())
}

/// Sum of one result item's hourly sequence, skipping non-finite entries
fn sequence_sum(results: &Value, key: &str) -> Option<f64> {
    let sequences = results.get(key)?.get("sequences")?.as_array()?;
    Some(
        sequences
            .iter()
            .filter_map(parse_float)
            .filter(|f| f.is_finite())
            .sum(),
    )
}

#[async_trait]
impl ResultsSummarizer for FinancialSummarizer {
    async fn summarize(
        &self,
        grid_input: &str,
        grid_results: Option<&str>,
        supply_input: &str,
        supply_results: Option<&str>,
    ) -> Result<ResultsSummary> {
        self.summarize_inner(grid_input, grid_results, supply_input, supply_results)
    }
}
