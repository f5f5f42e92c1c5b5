use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::adaptive::AdaptiveSpec;
use crate::params::{
    BLOCK_STATE, PROCEDURE_STATE, ParamBinding, ParamValue, ParameterTable, SESSION_STATE,
    TRIAL_STATE,
};

/// Level of a unit in the procedure tree, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Procedure,
    Session,
    Block,
    Trial,
}

impl UnitKind {
    pub fn depth(self) -> u8 {
        self as u8
    }

    /// Name of the parameter holding this level's state.
    pub fn slot(self) -> &'static str {
        match self {
            UnitKind::Procedure => PROCEDURE_STATE,
            UnitKind::Session => SESSION_STATE,
            UnitKind::Block => BLOCK_STATE,
            UnitKind::Trial => TRIAL_STATE,
        }
    }

    pub fn child_kind(self) -> Option<UnitKind> {
        match self {
            UnitKind::Procedure => Some(UnitKind::Session),
            UnitKind::Session => Some(UnitKind::Block),
            UnitKind::Block => Some(UnitKind::Trial),
            UnitKind::Trial => None,
        }
    }

    pub fn is_trial(self) -> bool {
        self == UnitKind::Trial
    }

    pub const ALL: [UnitKind; 4] = [
        UnitKind::Procedure,
        UnitKind::Session,
        UnitKind::Block,
        UnitKind::Trial,
    ];
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitKind::Procedure => "procedure",
            UnitKind::Session => "session",
            UnitKind::Block => "block",
            UnitKind::Trial => "trial",
        };
        f.write_str(s)
    }
}

/// Display lists a unit owns. Containers run `Start` and `End` around their
/// children; trials run `Main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ListKind {
    Start,
    Main,
    End,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct UnitModifiers: u8 {
        const FIRST_BLOCK = 1 << 0;
        const LAST_BLOCK = 1 << 1;
        const WITHIN_FACTOR = 1 << 2;
        const BETWEEN_FACTOR = 1 << 3;
        /// Children are in randomized order; a repeated error trial lands at
        /// a random position among the siblings not yet run.
        const RANDOM_FACTOR = 1 << 4;
        const EXPLICIT_ASSIGNMENT = 1 << 5;
    }
}

/// One node of the procedure tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub(crate) kind: UnitKind,
    pub(crate) name: String,
    pub(crate) bindings: Vec<ParamBinding>,
    pub(crate) children: Vec<Unit>,
    pub(crate) modifiers: UnitModifiers,
    pub(crate) adaptive: Option<AdaptiveSpec>,
}

impl Unit {
    pub fn new(kind: UnitKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            bindings: Vec::new(),
            children: Vec::new(),
            modifiers: UnitModifiers::empty(),
            adaptive: None,
        }
    }

    pub fn procedure(name: impl Into<String>) -> Self {
        Self::new(UnitKind::Procedure, name)
    }

    pub fn session(name: impl Into<String>) -> Self {
        Self::new(UnitKind::Session, name)
    }

    pub fn block(name: impl Into<String>) -> Self {
        Self::new(UnitKind::Block, name)
    }

    pub fn trial(name: impl Into<String>) -> Self {
        Self::new(UnitKind::Trial, name)
    }

    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.bindings.push(ParamBinding::new(name, value));
        self
    }

    pub fn with_child(mut self, child: Unit) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Unit>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_modifiers(mut self, modifiers: UnitModifiers) -> Self {
        self.modifiers |= modifiers;
        self
    }

    pub fn with_adaptive(mut self, adaptive: AdaptiveSpec) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &[ParamBinding] {
        &self.bindings
    }

    /// Value this unit binds for `name`, if any.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.bindings
            .iter()
            .rev()
            .find(|b| &*b.name == name)
            .map(|b| &b.value)
    }

    pub fn children(&self) -> &[Unit] {
        &self.children
    }

    pub fn modifiers(&self) -> UnitModifiers {
        self.modifiers
    }

    pub fn adaptive(&self) -> Option<&AdaptiveSpec> {
        self.adaptive.as_ref()
    }

    /// Trials in this subtree, counting the unit itself if it is one.
    pub fn trial_count(&self) -> usize {
        if self.kind.is_trial() {
            1
        } else {
            self.children.iter().map(Unit::trial_count).sum()
        }
    }

    /// Copy of the unit whose bindings carry the values currently in `params`.
    pub(crate) fn refreshed(&self, params: &ParameterTable) -> Unit {
        let mut copy = self.clone();
        for binding in &mut copy.bindings {
            if let Some(value) = params.get(&binding.name) {
                binding.value = value.clone();
            }
        }
        copy
    }
}
