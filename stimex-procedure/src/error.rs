use stimex_core::CoreError;
use thiserror::Error;

use crate::unit::UnitKind;

#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error("the root unit must be a procedure, found a {0}")]
    RootNotProcedure(UnitKind),

    #[error("{child} cannot be placed in {parent} `{name}`")]
    InvalidNesting {
        parent: UnitKind,
        name: String,
        child: UnitKind,
    },

    #[error("{kind} `{name}` carries adaptive settings; only blocks adapt")]
    MisplacedAdaptive { kind: UnitKind, name: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ProcedureError>;
