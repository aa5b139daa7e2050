//! Canonical per-cell, per-cycle degradation record.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::integrate::{charge_and_discharge, TimeBase};
use crate::{CdtError, CdtResult};

/// Sample series serialize non-finite values as `null` (JSON has no NaN);
/// these helpers read `null` back as NaN.
mod float_series {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(de)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    pub fn deserialize_scalar<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(de)?.unwrap_or(f64::NAN))
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<Vec<f64>>, D::Error> {
        let raw: Option<Vec<Option<f64>>> = Option::deserialize(de)?;
        Ok(raw.map(|values| values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()))
    }
}

// ============================================================================
// Cycle-level auxiliary data
// ============================================================================

/// Free-form auxiliary value carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Scalar(#[serde(deserialize_with = "float_series::deserialize_scalar")] f64),
    Series(#[serde(deserialize_with = "float_series::deserialize")] Vec<f64>),
    Text(String),
}

/// Dataset-specific per-cycle series. Core algorithms only read `qdlin`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleExtra {
    /// Discharge capacity precomputed on a fixed voltage grid by the cycler
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub qdlin: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub tdlin: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub discharge_dqdv: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub step_index: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub charge_energy_wh: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub discharge_energy_wh: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub data_point: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, ExtraValue>,
}

impl CycleExtra {
    pub fn is_empty(&self) -> bool {
        self == &CycleExtra::default()
    }
}

// ============================================================================
// CycleRecord
// ============================================================================

/// One charge/discharge cycle of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_number: u32,
    #[serde(deserialize_with = "float_series::deserialize")]
    pub time_s: Vec<f64>,
    #[serde(deserialize_with = "float_series::deserialize")]
    pub current_a: Vec<f64>,
    #[serde(deserialize_with = "float_series::deserialize")]
    pub voltage_v: Vec<f64>,
    #[serde(deserialize_with = "float_series::deserialize")]
    pub charge_capacity_ah: Vec<f64>,
    #[serde(deserialize_with = "float_series::deserialize")]
    pub discharge_capacity_ah: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "float_series::deserialize_opt")]
    pub temperature_c: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_resistance_ohm: Option<f64>,
    #[serde(default, skip_serializing_if = "CycleExtra::is_empty")]
    pub extra: CycleExtra,
}

impl CycleRecord {
    /// Build a cycle whose capacity traces are reported by the cycler.
    pub fn new(
        cycle_number: u32,
        time_s: Vec<f64>,
        current_a: Vec<f64>,
        voltage_v: Vec<f64>,
        charge_capacity_ah: Vec<f64>,
        discharge_capacity_ah: Vec<f64>,
    ) -> Self {
        Self {
            cycle_number,
            time_s,
            current_a,
            voltage_v,
            charge_capacity_ah,
            discharge_capacity_ah,
            temperature_c: None,
            internal_resistance_ohm: None,
            extra: CycleExtra::default(),
        }
    }

    /// Build a cycle whose capacity traces are integrated from the current.
    ///
    /// `time` is in `base` units and is used for integration; `time_s` is
    /// stored in seconds.
    pub fn from_current(
        cycle_number: u32,
        time: Vec<f64>,
        current_a: Vec<f64>,
        voltage_v: Vec<f64>,
        base: TimeBase,
    ) -> Self {
        let (charge, discharge) = charge_and_discharge(&current_a, &time, base);
        let time_s = match base {
            TimeBase::Seconds => time,
            TimeBase::Milliseconds => time.into_iter().map(|t| t / 1000.0).collect(),
        };
        Self::new(cycle_number, time_s, current_a, voltage_v, charge, discharge)
    }

    pub fn with_temperature(mut self, temperature_c: Vec<f64>) -> Self {
        self.temperature_c = Some(temperature_c);
        self
    }

    /// Set the cycle's internal resistance. A non-finite reading means
    /// "not measured" and is stored as `None`.
    pub fn with_internal_resistance(mut self, ohm: f64) -> Self {
        self.internal_resistance_ohm = Some(ohm).filter(|r| r.is_finite());
        self
    }

    pub fn with_extra(mut self, extra: CycleExtra) -> Self {
        self.extra = extra;
        self
    }

    /// Copy of this cycle filed under another cycle number.
    pub fn renumbered(&self, cycle_number: u32) -> Self {
        Self {
            cycle_number,
            ..self.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_s.is_empty()
    }

    /// Largest discharge capacity reached in the cycle, ignoring NaN.
    /// An empty or all-NaN cycle reports 0.
    pub fn max_discharge_capacity(&self) -> f64 {
        let max = self
            .discharge_capacity_ah
            .iter()
            .filter(|v| !v.is_nan())
            .fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));
        if max.is_finite() {
            max
        } else {
            0.0
        }
    }

    /// Structural check: every sample series has the same length and both
    /// capacity traces are non-decreasing.
    pub fn validate(&self) -> CdtResult<()> {
        let len = self.time_s.len();
        let mut series = vec![
            ("current_a", self.current_a.len()),
            ("voltage_v", self.voltage_v.len()),
            ("charge_capacity_ah", self.charge_capacity_ah.len()),
            ("discharge_capacity_ah", self.discharge_capacity_ah.len()),
        ];
        if let Some(t) = &self.temperature_c {
            series.push(("temperature_c", t.len()));
        }
        for (name, n) in series {
            if n != len {
                return Err(CdtError::Validation(format!(
                    "cycle {}: {name} has {n} samples, time_s has {len}",
                    self.cycle_number
                )));
            }
        }
        if !self.capacities_monotone() {
            return Err(CdtError::Validation(format!(
                "cycle {}: capacity decreases within the cycle",
                self.cycle_number
            )));
        }
        Ok(())
    }

    /// Whether both capacity traces are non-decreasing (NaN samples skipped).
    pub fn capacities_monotone(&self) -> bool {
        fn monotone(values: &[f64]) -> bool {
            let mut prev = f64::NEG_INFINITY;
            for v in values.iter().filter(|v| !v.is_nan()) {
                if *v < prev {
                    return false;
                }
                prev = *v;
            }
            true
        }
        monotone(&self.charge_capacity_ah) && monotone(&self.discharge_capacity_ah)
    }
}

// ============================================================================
// Protocols and CellRecord
// ============================================================================

/// One stage of a charge or discharge protocol. Descriptive only.
///
/// Unit-suffixed keys such as `rate_in_C` are accepted when reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CyclingProtocol {
    #[serde(default, alias = "rate_in_C", skip_serializing_if = "Option::is_none")]
    pub rate_c: Option<f64>,
    #[serde(default, alias = "current_in_A", skip_serializing_if = "Option::is_none")]
    pub current_a: Option<f64>,
    #[serde(default, alias = "voltage_in_V", skip_serializing_if = "Option::is_none")]
    pub voltage_v: Option<f64>,
    #[serde(default, alias = "power_in_W", skip_serializing_if = "Option::is_none")]
    pub power_w: Option<f64>,
    #[serde(default, alias = "start_voltage_in_V", skip_serializing_if = "Option::is_none")]
    pub start_voltage_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_soc: Option<f64>,
    #[serde(default, alias = "end_voltage_in_V", skip_serializing_if = "Option::is_none")]
    pub end_voltage_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_soc: Option<f64>,
}

impl CyclingProtocol {
    /// Constant C-rate stage between two states of charge.
    pub fn c_rate(rate_c: f64, start_soc: f64, end_soc: f64) -> Self {
        Self {
            rate_c: Some(rate_c),
            start_soc: Some(start_soc),
            end_soc: Some(end_soc),
            ..Self::default()
        }
    }
}

fn unit_depth() -> f64 {
    1.0
}

/// One physical cell: metadata plus its cycles ordered by cycle number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub cell_id: String,
    pub cycle_data: Vec<CycleRecord>,
    #[serde(default)]
    pub form_factor: Option<String>,
    #[serde(default)]
    pub anode_material: Option<String>,
    #[serde(default)]
    pub cathode_material: Option<String>,
    #[serde(default)]
    pub electrolyte_material: Option<String>,
    #[serde(default)]
    pub nominal_capacity_ah: Option<f64>,
    #[serde(default = "unit_depth")]
    pub depth_of_charge: f64,
    #[serde(default = "unit_depth")]
    pub depth_of_discharge: f64,
    #[serde(default)]
    pub already_spent_cycles: u32,
    #[serde(default)]
    pub charge_protocol: Vec<CyclingProtocol>,
    #[serde(default)]
    pub discharge_protocol: Vec<CyclingProtocol>,
    #[serde(default)]
    pub max_voltage_limit_v: Option<f64>,
    #[serde(default)]
    pub min_voltage_limit_v: Option<f64>,
    #[serde(default)]
    pub max_current_limit_a: Option<f64>,
    #[serde(default)]
    pub min_current_limit_a: Option<f64>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for CellRecord {
    fn default() -> Self {
        Self {
            cell_id: String::new(),
            cycle_data: Vec::new(),
            form_factor: None,
            anode_material: None,
            cathode_material: None,
            electrolyte_material: None,
            nominal_capacity_ah: None,
            depth_of_charge: 1.0,
            depth_of_discharge: 1.0,
            already_spent_cycles: 0,
            charge_protocol: Vec::new(),
            discharge_protocol: Vec::new(),
            max_voltage_limit_v: None,
            min_voltage_limit_v: None,
            max_current_limit_a: None,
            min_current_limit_a: None,
            reference: None,
            description: None,
        }
    }
}

impl CellRecord {
    pub fn new(cell_id: impl Into<String>, cycle_data: Vec<CycleRecord>) -> Self {
        Self {
            cell_id: cell_id.into(),
            cycle_data,
            ..Self::default()
        }
    }

    /// `(min, max)` operating voltage, when both limits are known.
    pub fn voltage_bounds(&self) -> Option<(f64, f64)> {
        match (self.min_voltage_limit_v, self.max_voltage_limit_v) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        }
    }

    /// Maximum discharge capacity of every cycle, in cycle order.
    pub fn discharge_capacity_trend(&self) -> Vec<f64> {
        self.cycle_data
            .iter()
            .map(CycleRecord::max_discharge_capacity)
            .collect()
    }

    /// Check the post-cleaning invariants: at least one cycle, contiguous
    /// cycle numbers from the first cycle, and per-cycle series that agree
    /// in length with capacities that never decrease.
    pub fn validate(&self) -> CdtResult<()> {
        let first = self.cycle_data.first().ok_or_else(|| {
            CdtError::Validation(format!("cell '{}' has no cycles", self.cell_id))
        })?;
        let mut expected = first.cycle_number;
        for cycle in &self.cycle_data {
            if cycle.cycle_number != expected {
                return Err(CdtError::Validation(format!(
                    "cell '{}': expected cycle {expected}, found {}",
                    self.cell_id, cycle.cycle_number
                )));
            }
            cycle.validate().map_err(|err| {
                CdtError::Validation(format!("cell '{}': {err}", self.cell_id))
            })?;
            expected += 1;
        }
        Ok(())
    }

    /// Human-readable summary of the populated metadata.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cell {}", self.cell_id);
        let _ = writeln!(out, "  cycles: {}", self.cycle_data.len());
        if let (Some(first), Some(last)) = (self.cycle_data.first(), self.cycle_data.last()) {
            let _ = writeln!(
                out,
                "  cycle numbers: {}..={}",
                first.cycle_number, last.cycle_number
            );
        }
        let text_fields = [
            ("form factor", &self.form_factor),
            ("anode", &self.anode_material),
            ("cathode", &self.cathode_material),
            ("electrolyte", &self.electrolyte_material),
            ("reference", &self.reference),
            ("description", &self.description),
        ];
        for (label, value) in text_fields {
            if let Some(value) = value {
                let _ = writeln!(out, "  {label}: {value}");
            }
        }
        if let Some(c) = self.nominal_capacity_ah {
            let _ = writeln!(out, "  nominal capacity: {c} Ah");
        }
        if let Some((lo, hi)) = self.voltage_bounds() {
            let _ = writeln!(out, "  voltage window: {lo}-{hi} V");
        }
        if let Some(i) = self.max_current_limit_a {
            let _ = writeln!(out, "  max current: {i} A");
        }
        if !self.charge_protocol.is_empty() {
            let _ = writeln!(out, "  charge stages: {}", self.charge_protocol.len());
        }
        if !self.discharge_protocol.is_empty() {
            let _ = writeln!(out, "  discharge stages: {}", self.discharge_protocol.len());
        }
        out
    }
}
