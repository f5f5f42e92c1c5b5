use serde::{Deserialize, Serialize};

/// Outcome of running one procedure unit, interpreted by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitState {
    #[default]
    Execute,
    Break,
    Stop,
    Error,
    Repeat,
    Copy,
}

impl UnitState {
    fn rank(self) -> u8 {
        match self {
            UnitState::Execute => 0,
            UnitState::Error | UnitState::Repeat | UnitState::Copy => 1,
            UnitState::Break => 2,
            UnitState::Stop => 3,
        }
    }

    /// The stronger of two signals raised for the same unit.
    ///
    /// `Stop > Break > {Error, Repeat, Copy} > Execute`. Within the middle
    /// tier the signal raised first wins.
    pub fn dominant(self, other: UnitState) -> UnitState {
        if other.rank() > self.rank() { other } else { self }
    }

    pub fn is_stop(self) -> bool {
        self == UnitState::Stop
    }

    pub fn is_break(self) -> bool {
        self == UnitState::Break
    }

    /// Signals that ask the parent to insert a clone of the unit.
    pub fn requests_clone(self) -> bool {
        matches!(self, UnitState::Error | UnitState::Repeat | UnitState::Copy)
    }
}

#[cfg(test)]
mod tests {
    use super::UnitState::*;

    #[test]
    fn stop_dominates_everything() {
        for s in [Execute, Break, Error, Repeat, Copy, Stop] {
            assert_eq!(Stop.dominant(s), Stop);
            assert_eq!(s.dominant(Stop), Stop);
        }
    }

    #[test]
    fn break_dominates_clone_requests() {
        for s in [Error, Repeat, Copy] {
            assert_eq!(s.dominant(Break), Break);
            assert_eq!(Break.dominant(s), Break);
            assert_eq!(Execute.dominant(s), s);
        }
    }

    #[test]
    fn first_clone_request_wins_a_tie() {
        assert_eq!(Error.dominant(Repeat), Error);
        assert_eq!(Copy.dominant(Error), Copy);
    }

    #[test]
    fn only_middle_tier_requests_a_clone() {
        assert!([Error, Repeat, Copy].into_iter().all(|s| s.requests_clone()));
        assert!(![Execute, Break, Stop].into_iter().any(|s| s.requests_clone()));
    }
}
