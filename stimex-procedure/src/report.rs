use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stimex_core::UnitState;

use crate::params::ParamValue;
use crate::unit::{ListKind, UnitKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Position in execution order, counting repeats and copies.
    pub sequence: usize,
    pub block: String,
    pub name: String,
    pub state: UnitState,
    /// Values the trial had bound when its main list finished.
    pub params: BTreeMap<String, ParamValue>,
    pub started_at: u64,
    pub finished_at: u64,
}

impl TrialRecord {
    pub fn duration_nanos(&self) -> u64 {
        self.finished_at.saturating_sub(self.started_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveStop {
    pub block: String,
    /// Trials observed by the evaluator, the stopping one included.
    pub trials: usize,
    pub turning_points: u32,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub trials: Vec<TrialRecord>,
    /// Keyed `"<kind>.<list>"`, e.g. `"block.End"`.
    pub list_runs: BTreeMap<String, u32>,
    /// Level that requested the stop, if the run was stopped.
    pub stop_origin: Option<UnitKind>,
    pub errors: u32,
    pub insertions: u32,
    pub adaptive_stops: Vec<AdaptiveStop>,
}

fn list_key(kind: UnitKind, list: ListKind) -> String {
    format!("{kind}.{list:?}")
}

impl RunReport {
    pub(crate) fn count_list(&mut self, kind: UnitKind, list: ListKind) {
        *self.list_runs.entry(list_key(kind, list)).or_default() += 1;
    }

    pub fn list_runs(&self, kind: UnitKind, list: ListKind) -> u32 {
        self.list_runs
            .get(&list_key(kind, list))
            .copied()
            .unwrap_or(0)
    }

    pub fn trial_names(&self) -> Vec<&str> {
        self.trials.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn stopped(&self) -> bool {
        self.stop_origin.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
