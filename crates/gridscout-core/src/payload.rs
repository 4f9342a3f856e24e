//! Wire types for the external grid and supply optimizer services.
//!
//! The grid service expects its node table as a JSON string nested inside the
//! outer JSON document, so [`GridInput::to_payload`] stringifies the nodes
//! separately. Optimizer payloads travel through JSON columns that cannot
//! hold IEEE non-finite values; [`float_value`] and [`parse_float`] encode
//! NaN and the infinities as the sentinel strings "NaN", "Infinity" and
//! "-Infinity" on write and read. The sentinel encoding is applied at every
//! payload boundary so a non-finite float never silently becomes null.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{ExploreError, Result};

/// Encode a float for a JSON payload, non-finite values as sentinel strings
pub fn float_value(f: f64) -> Value {
    if f.is_nan() {
        Value::String("NaN".to_string())
    } else if f == f64::INFINITY {
        Value::String("Infinity".to_string())
    } else if f == f64::NEG_INFINITY {
        Value::String("-Infinity".to_string())
    } else {
        // finite f64 always has a JSON number representation
        json!(f)
    }
}

/// Decode a float from a JSON payload, accepting numbers and the sentinel
/// strings. Null and anything else decode to None.
pub fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => s.parse::<f64>().ok(),
        },
        _ => None,
    }
}

/// How a node entered the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HowAdded {
    #[serde(rename = "automatic")]
    Automatic,
    #[serde(rename = "k-means")]
    KMeans,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "consumer")]
    Consumer,
    #[serde(rename = "power-house")]
    PowerHouse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerType {
    #[serde(rename = "household")]
    Household,
    #[serde(rename = "n.a.")]
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerDetail {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "n.a.")]
    NotApplicable,
}

/// Columnar node table of the grid optimizer: one map per attribute, keyed by
/// the stringified node id. Every map must hold exactly the same key set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub latitude: BTreeMap<String, f64>,
    pub longitude: BTreeMap<String, f64>,
    pub how_added: BTreeMap<String, HowAdded>,
    pub node_type: BTreeMap<String, NodeType>,
    pub consumer_type: BTreeMap<String, ConsumerType>,
    pub custom_specification: BTreeMap<String, String>,
    pub shs_options: BTreeMap<String, i64>,
    pub consumer_detail: BTreeMap<String, ConsumerDetail>,
    pub is_connected: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_to_load_center: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<BTreeMap<String, Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_cost: Option<BTreeMap<String, f64>>,
}

impl NodeAttributes {
    /// Check that all attribute maps share one key set
    pub fn validate(&self) -> Result<()> {
        let reference: Vec<&String> = self.latitude.keys().collect();
        let mut mismatches: Vec<(&'static str, usize)> = Vec::new();

        let mut check_keys = |name: &'static str, keys: Vec<&String>| {
            if keys != reference {
                mismatches.push((name, keys.len()));
            }
        };
        check_keys("longitude", self.longitude.keys().collect());
        check_keys("how_added", self.how_added.keys().collect());
        check_keys("node_type", self.node_type.keys().collect());
        check_keys("consumer_type", self.consumer_type.keys().collect());
        check_keys(
            "custom_specification",
            self.custom_specification.keys().collect(),
        );
        check_keys("shs_options", self.shs_options.keys().collect());
        check_keys("consumer_detail", self.consumer_detail.keys().collect());
        check_keys("is_connected", self.is_connected.keys().collect());
        if let Some(m) = &self.distance_to_load_center {
            check_keys("distance_to_load_center", m.keys().collect());
        }
        if let Some(m) = &self.parent {
            check_keys("parent", m.keys().collect());
        }
        if let Some(m) = &self.distribution_cost {
            check_keys("distribution_cost", m.keys().collect());
        }

        if !mismatches.is_empty() {
            return Err(ExploreError::Validation(format!(
                "inconsistent node id keys across attributes (expected {} nodes): {:?}",
                reference.len(),
                mismatches
            )));
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.latitude.len()
    }
}

/// Cost/constraint settings for one grid component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridDesignComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capex: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_n_connections: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_grid_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridDesign {
    pub distribution_cable: GridDesignComponent,
    pub connection_cable: GridDesignComponent,
    pub pole: GridDesignComponent,
    pub mg: GridDesignComponent,
    pub shs: GridDesignComponent,
}

/// Input document of the grid layout optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridInput {
    pub nodes: NodeAttributes,
    pub grid_design: GridDesign,
    pub yearly_demand: f64,
}

impl GridInput {
    /// Serialize for the wire: the node table becomes a JSON string inside
    /// the outer document, which is what the grid service expects.
    pub fn to_payload(&self) -> Result<Value> {
        self.nodes.validate()?;
        let nodes = serde_json::to_string(&self.nodes)?;
        Ok(json!({
            "nodes": nodes,
            "grid_design": serde_json::to_value(&self.grid_design)?,
            "yearly_demand": float_value(self.yearly_demand),
        }))
    }

    /// Parse a wire document, accepting the node table either stringified or
    /// as a plain object
    pub fn from_payload(value: &Value) -> Result<Self> {
        let nodes_value = value
            .get("nodes")
            .ok_or_else(|| ExploreError::Validation("grid input is missing 'nodes'".into()))?;
        let nodes: NodeAttributes = match nodes_value {
            Value::String(s) => serde_json::from_str(s)?,
            other => serde_json::from_value(other.clone())?,
        };
        let grid_design = value
            .get("grid_design")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| ExploreError::Validation("grid input is missing 'grid_design'".into()))?;
        let yearly_demand = value
            .get("yearly_demand")
            .and_then(parse_float)
            .ok_or_else(|| {
                ExploreError::Validation("grid input is missing 'yearly_demand'".into())
            })?;
        Ok(Self {
            nodes,
            grid_design,
            yearly_demand,
        })
    }
}

/// Time index of the supply sequences, hourly frequency only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceIndex {
    pub start_date: String,
    pub n_days: u32,
    pub freq: String,
}

impl SequenceIndex {
    pub fn hourly(start_date: impl Into<String>, n_days: u32) -> Self {
        Self {
            start_date: start_date.into(),
            n_days,
            freq: "h".to_string(),
        }
    }
}

/// Hourly demand and solar-potential series of the supply optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequences {
    pub index: SequenceIndex,
    pub demand: Vec<f64>,
    pub solar_potential: Vec<f64>,
}

impl Sequences {
    /// Both series must span exactly 24 hours per indexed day
    pub fn validate(&self) -> Result<()> {
        if self.index.n_days == 0 {
            return Err(ExploreError::Validation(
                "sequence index must span at least one day".into(),
            ));
        }
        let expected = 24 * self.index.n_days as usize;
        if self.demand.len() != expected || self.solar_potential.len() != expected {
            return Err(ExploreError::Validation(format!(
                "all sequences must have the same length: index={}, demand={}, solar_potential={}",
                expected,
                self.demand.len(),
                self.solar_potential.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSettings {
    pub is_selected: bool,
    pub design: bool,
}

/// Technical and cost parameters of one supply component. Only the subset
/// relevant to a given component is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal_capacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_rate_in: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_rate_out: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_lhv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_load: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_load: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_efficiency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_efficiency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capex: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opex: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplyComponent {
    pub settings: ComponentSettings,
    pub parameters: ComponentParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortageSettings {
    pub is_selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortageParameters {
    pub max_shortage_total: f64,
    pub max_shortage_timestep: f64,
    pub shortage_penalty_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shortage {
    pub settings: ShortageSettings,
    pub parameters: ShortageParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergySystemDesign {
    pub battery: SupplyComponent,
    pub diesel_genset: SupplyComponent,
    pub inverter: SupplyComponent,
    pub pv: SupplyComponent,
    pub rectifier: SupplyComponent,
    pub shortage: Shortage,
}

/// Input document of the energy-supply sizing optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyInput {
    pub sequences: Sequences,
    pub energy_system_design: EnergySystemDesign,
}

impl SupplyInput {
    /// Serialize for the wire, with sequence floats sentinel-encoded
    pub fn to_payload(&self) -> Result<Value> {
        self.sequences.validate()?;
        let demand: Vec<Value> = self.sequences.demand.iter().copied().map(float_value).collect();
        let solar: Vec<Value> = self
            .sequences
            .solar_potential
            .iter()
            .copied()
            .map(float_value)
            .collect();
        Ok(json!({
            "sequences": {
                "index": serde_json::to_value(&self.sequences.index)?,
                "demand": demand,
                "solar_potential": solar,
            },
            "energy_system_design": serde_json::to_value(&self.energy_system_design)?,
        }))
    }

    pub fn from_payload(value: &Value) -> Result<Self> {
        let sequences_value = value.get("sequences").ok_or_else(|| {
            ExploreError::Validation("supply input is missing 'sequences'".into())
        })?;
        let index = sequences_value
            .get("index")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| ExploreError::Validation("sequence index missing".into()))?;
        let demand = parse_float_series(sequences_value.get("demand"))?;
        let solar_potential = parse_float_series(sequences_value.get("solar_potential"))?;
        let energy_system_design = value
            .get("energy_system_design")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| {
                ExploreError::Validation("supply input is missing 'energy_system_design'".into())
            })?;
        Ok(Self {
            sequences: Sequences {
                index,
                demand,
                solar_potential,
            },
            energy_system_design,
        })
    }
}

fn parse_float_series(value: Option<&Value>) -> Result<Vec<f64>> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| ExploreError::Validation("missing or non-array float series".into()))?;
    items
        .iter()
        .map(|v| {
            parse_float(v)
                .ok_or_else(|| ExploreError::Validation(format!("non-numeric series entry: {v}")))
        })
        .collect()
}
