use stimex_core::{Display, RuntimeContext, UnitState};

use crate::params::ParameterTable;
use crate::unit::{ListKind, Unit};

/// Runs the display lists of procedure units.
///
/// The returned state is interpreted by the state machine; level slots may
/// also be written through `params` (e.g. `BlockState = Stop`).
pub trait UnitExecutor {
    type Display: Display;

    fn run_list(
        &mut self,
        unit: &Unit,
        list: ListKind,
        params: &mut ParameterTable,
        ctx: &mut RuntimeContext<Self::Display>,
    ) -> UnitState;
}

impl<X: UnitExecutor + ?Sized> UnitExecutor for &mut X {
    type Display = X::Display;

    fn run_list(
        &mut self,
        unit: &Unit,
        list: ListKind,
        params: &mut ParameterTable,
        ctx: &mut RuntimeContext<Self::Display>,
    ) -> UnitState {
        (**self).run_list(unit, list, params, ctx)
    }
}
