pub mod adaptive;
pub mod error;
pub mod executor;
pub mod params;
pub mod report;
pub mod state;
pub mod unit;

pub use adaptive::{
    AdaptiveEvaluator, AdaptiveSpec, StopRule, TurningPoint, should_stop, stop_point,
    turning_points,
};
pub use error::{ProcedureError, Result};
pub use executor::UnitExecutor;
pub use params::{
    Atom, BLOCK_STATE, PROCEDURE_STATE, ParamBinding, ParamValue, ParameterTable, SESSION_STATE,
    Scope, TRIAL_STATE,
};
pub use report::{AdaptiveStop, RunReport, TrialRecord};
pub use state::{InsertAt, Insertion, ProcedureStateMachine};
pub use unit::{ListKind, Unit, UnitKind, UnitModifiers};
