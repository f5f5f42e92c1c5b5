use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use stimex_core::UnitState;
pub use string_cache::DefaultAtom as Atom;

pub const PROCEDURE_STATE: &str = "ProcedureState";
pub const SESSION_STATE: &str = "SessionState";
pub const BLOCK_STATE: &str = "BlockState";
pub const TRIAL_STATE: &str = "TrialState";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    State(UnitState),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<UnitState> {
        match self {
            ParamValue::State(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
            ParamValue::State(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<UnitState> for ParamValue {
    fn from(v: UnitState) -> Self {
        ParamValue::State(v)
    }
}

/// A value a unit puts into the parameter table while it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBinding {
    pub name: Atom,
    pub value: ParamValue,
}

impl ParamBinding {
    pub fn new(name: &str, value: impl Into<ParamValue>) -> Self {
        Self {
            name: Atom::from(name),
            value: value.into(),
        }
    }
}

/// Values shadowed by [`ParameterTable::bind`], handed back to
/// [`ParameterTable::restore`] when the unit finishes.
#[derive(Debug, Default)]
#[must_use]
pub struct Scope {
    saved: Vec<(Atom, Option<ParamValue>)>,
}

/// The run-wide parameter table. Units bind their values on entry and the
/// previous values come back on exit, so a name bound by a block stays
/// visible (and writable) to every trial inside it.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    values: HashMap<Atom, ParamValue>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(&Atom::from(name))
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.values.insert(Atom::from(name), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.values.remove(&Atom::from(name))
    }

    /// State held by a level slot; anything but a state reads as `Execute`.
    pub fn get_state(&self, slot: &str) -> UnitState {
        self.get(slot)
            .and_then(ParamValue::as_state)
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, slot: &str, state: UnitState) {
        self.set(slot, state);
    }

    pub fn bind(&mut self, bindings: &[ParamBinding]) -> Scope {
        let saved = bindings
            .iter()
            .map(|b| {
                let previous = self.values.insert(b.name.clone(), b.value.clone());
                (b.name.clone(), previous)
            })
            .collect();
        Scope { saved }
    }

    pub fn restore(&mut self, scope: Scope) {
        for (name, previous) in scope.saved.into_iter().rev() {
            match previous {
                Some(v) => self.values.insert(name, v),
                None => self.values.remove(&name),
            };
        }
    }

    /// Sorted copy of the named values that are currently set.
    pub fn snapshot<'a>(
        &self,
        names: impl IntoIterator<Item = &'a Atom>,
    ) -> BTreeMap<String, ParamValue> {
        names
            .into_iter()
            .filter_map(|n| self.values.get(n).map(|v| (n.to_string(), v.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_shadows_and_restore_unwinds() {
        let mut params = ParameterTable::new();
        params.set("contrast", 0.5);
        let scope = params.bind(&[
            ParamBinding::new("contrast", 0.8),
            ParamBinding::new("target", "left"),
        ]);
        assert_eq!(params.get_f64("contrast"), Some(0.8));
        assert_eq!(params.get("target").and_then(ParamValue::as_text), Some("left"));

        params.restore(scope);
        assert_eq!(params.get_f64("contrast"), Some(0.5));
        assert!(params.get("target").is_none());
    }

    #[test]
    fn duplicate_bindings_restore_the_outer_value() {
        let mut params = ParameterTable::new();
        params.set("x", 1);
        let scope = params.bind(&[ParamBinding::new("x", 2), ParamBinding::new("x", 3)]);
        assert_eq!(params.get("x").and_then(ParamValue::as_i64), Some(3));
        params.restore(scope);
        assert_eq!(params.get("x").and_then(ParamValue::as_i64), Some(1));
    }

    #[test]
    fn slots_default_to_execute() {
        let mut params = ParameterTable::new();
        assert_eq!(params.get_state(BLOCK_STATE), UnitState::Execute);
        params.set(BLOCK_STATE, "oops");
        assert_eq!(params.get_state(BLOCK_STATE), UnitState::Execute);
        params.set_state(BLOCK_STATE, UnitState::Break);
        assert_eq!(params.get_state(BLOCK_STATE), UnitState::Break);
    }

    #[test]
    fn integers_read_as_floats() {
        let mut params = ParameterTable::new();
        params.set("level", 4);
        assert_eq!(params.get_f64("level"), Some(4.0));
        assert_eq!(params.get_bool("level"), None);
    }
}
