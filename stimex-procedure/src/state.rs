use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stimex_core::{CoreError, RuntimeContext, UnitState};
use stimex_timing::{Clock, MonotonicClock};

use crate::adaptive::AdaptiveEvaluator;
use crate::error::{ProcedureError, Result};
use crate::executor::UnitExecutor;
use crate::params::ParameterTable;
use crate::report::{AdaptiveStop, RunReport, TrialRecord};
use crate::unit::{ListKind, Unit, UnitKind, UnitModifiers};

/// Where a parent places a clone requested by one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// Right after the child that asked for it.
    Next,
    /// Anywhere among the siblings that have not run yet.
    RandomAhead,
}

/// Instruction handed back to the parent, which owns its child list.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub at: InsertAt,
    pub unit: Unit,
}

#[derive(Debug)]
struct UnitOutcome {
    state: UnitState,
    insertion: Option<Insertion>,
}

/// Walks a procedure tree, running each unit's lists through a
/// [`UnitExecutor`] and acting on the states they return.
pub struct ProcedureStateMachine<X, R>
where
    X: UnitExecutor,
    R: Rng,
{
    executor: X,
    rng: R,
    ctx: RuntimeContext<X::Display>,
    params: ParameterTable,
    clock: MonotonicClock,
    report: RunReport,
    stop_origin: Option<UnitKind>,
    block: String,
}

impl<X: UnitExecutor> ProcedureStateMachine<X, StdRng> {
    /// Seeds from `RuntimeConfig::seed`, or from the thread rng without one.
    pub fn seeded(executor: X, ctx: RuntimeContext<X::Display>) -> Self {
        let rng = match ctx.config().seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self::new(executor, ctx, rng)
    }
}

impl<X, R> ProcedureStateMachine<X, R>
where
    X: UnitExecutor,
    R: Rng,
{
    pub fn new(executor: X, ctx: RuntimeContext<X::Display>, rng: R) -> Self {
        Self {
            executor,
            rng,
            ctx,
            params: ParameterTable::new(),
            clock: MonotonicClock::new(),
            report: RunReport::default(),
            stop_origin: None,
            block: String::new(),
        }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut X {
        &mut self.executor
    }

    pub fn context(&self) -> &RuntimeContext<X::Display> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RuntimeContext<X::Display> {
        &mut self.ctx
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParameterTable {
        &mut self.params
    }

    pub fn into_parts(self) -> (X, RuntimeContext<X::Display>) {
        (self.executor, self.ctx)
    }

    /// Runs the whole tree. Clones inserted along the way stay in `procedure`.
    pub fn run(&mut self, procedure: &mut Unit) -> Result<RunReport> {
        validate(procedure)?;
        self.report = RunReport::default();
        self.stop_origin = None;
        self.block.clear();

        tracing::info!(
            "running procedure `{}` ({} trials)",
            procedure.name,
            procedure.trial_count()
        );
        let outcome = self.run_unit(procedure, false);
        if let Some(insertion) = outcome.insertion {
            tracing::warn!(
                "procedure `{}` asked for a {:?} clone of itself; ignored",
                insertion.unit.name,
                outcome.state
            );
        }

        self.report.stop_origin = self.stop_origin;
        tracing::info!(
            "procedure `{}` finished: {} trials, {} errors, {} insertions, stop origin {:?}",
            procedure.name,
            self.report.trials.len(),
            self.report.errors,
            self.report.insertions,
            self.stop_origin
        );
        Ok(std::mem::take(&mut self.report))
    }

    fn run_unit(&mut self, unit: &mut Unit, randomized_siblings: bool) -> UnitOutcome {
        let pristine = unit.clone();
        let scope = self.params.bind(&unit.bindings);
        self.params.set_state(unit.kind.slot(), UnitState::Execute);
        if self.ctx.config().trace_units {
            tracing::info!("enter {} `{}`", unit.kind, unit.name);
        } else {
            tracing::debug!("enter {} `{}`", unit.kind, unit.name);
        }

        let state = if unit.kind.is_trial() {
            self.run_trial(unit)
        } else {
            self.run_container(unit)
        };

        let insertion = if state.requests_clone() {
            self.clone_for(unit, state, pristine, randomized_siblings)
        } else {
            None
        };

        self.params.restore(scope);
        tracing::debug!("leave {} `{}`: {:?}", unit.kind, unit.name, state);
        UnitOutcome { state, insertion }
    }

    /// Clone the parent should insert for a unit that ended in `state`.
    fn clone_for(
        &mut self,
        unit: &Unit,
        state: UnitState,
        pristine: Unit,
        randomized_siblings: bool,
    ) -> Option<Insertion> {
        match state {
            UnitState::Repeat => Some(Insertion {
                at: InsertAt::Next,
                unit: pristine,
            }),
            UnitState::Copy => Some(Insertion {
                at: InsertAt::Next,
                unit: unit.refreshed(&self.params),
            }),
            UnitState::Error => {
                self.report.errors += 1;
                self.ctx.report(&CoreError::Unit(format!(
                    "{} `{}` returned an error",
                    unit.kind, unit.name
                )));
                self.ctx.config().repeat_error_trials.then(|| Insertion {
                    at: if randomized_siblings {
                        InsertAt::RandomAhead
                    } else {
                        InsertAt::Next
                    },
                    unit: pristine,
                })
            }
            _ => None,
        }
    }

    fn run_trial(&mut self, unit: &mut Unit) -> UnitState {
        let started_at = self.clock.now();
        let code = self.run_list(unit, ListKind::Main);
        let state = code.dominant(self.params.get_state(unit.kind.slot()));
        if state.is_stop() {
            self.stop_origin.get_or_insert(UnitKind::Trial);
        }

        self.report.trials.push(TrialRecord {
            sequence: self.report.trials.len(),
            block: self.block.clone(),
            name: unit.name.clone(),
            state,
            params: self.params.snapshot(unit.bindings.iter().map(|b| &b.name)),
            started_at,
            finished_at: self.clock.now(),
        });
        state
    }

    fn run_container(&mut self, unit: &mut Unit) -> UnitState {
        let kind = unit.kind;
        if kind == UnitKind::Block {
            self.block.clone_from(&unit.name);
        }

        let start = self.run_list(unit, ListKind::Start);
        if start.is_stop() {
            self.stop_origin.get_or_insert(kind);
        }
        let mut stopping = start.is_stop() || self.pending_stop(kind);

        if !stopping && !start.is_break() {
            stopping = self.run_children(unit);
        }

        let mut end = UnitState::Execute;
        if self.stop_origin.is_none_or(|origin| origin > kind) {
            end = self.run_list(unit, ListKind::End);
            if end.is_stop() {
                self.stop_origin.get_or_insert(kind);
                stopping = true;
            }
            stopping |= self.pending_stop(kind);
        } else {
            tracing::debug!("skipping end list of {} `{}`", kind, unit.name);
        }

        if stopping {
            return UnitState::Stop;
        }
        // A break ends this unit's own loop and goes no further up.
        [start, end, self.params.get_state(kind.slot())]
            .into_iter()
            .filter(|s| !s.is_break())
            .fold(UnitState::Execute, UnitState::dominant)
    }

    /// Returns whether the run is stopping.
    fn run_children(&mut self, unit: &mut Unit) -> bool {
        let kind = unit.kind;
        let randomized = unit.modifiers.contains(UnitModifiers::RANDOM_FACTOR);
        let mut evaluator = unit.adaptive.as_ref().map(|spec| spec.evaluator());

        let mut i = 0;
        while i < unit.children.len() {
            let child_is_trial = unit.children[i].kind.is_trial();
            let outcome = self.run_unit(&mut unit.children[i], randomized);

            if let Some(insertion) = outcome.insertion {
                let at = match insertion.at {
                    InsertAt::Next => i + 1,
                    InsertAt::RandomAhead => self.rng.random_range(i + 1..=unit.children.len()),
                };
                tracing::debug!(
                    "inserting {:?} clone of `{}` at {} in {} `{}`",
                    outcome.state,
                    insertion.unit.name,
                    at,
                    kind,
                    unit.name
                );
                unit.children.insert(at, insertion.unit);
                self.report.insertions += 1;
            }
            i += 1;

            if outcome.state.is_stop() || self.pending_stop(kind) {
                return true;
            }
            if outcome.state.is_break() || self.params.get_state(kind.slot()).is_break() {
                break;
            }
            if child_is_trial {
                if let Some(evaluator) = evaluator.as_mut() {
                    if self.observe_adaptive(unit, evaluator) {
                        break;
                    }
                }
            }
        }
        false
    }

    fn observe_adaptive(&mut self, unit: &Unit, evaluator: &mut AdaptiveEvaluator) -> bool {
        let Some(spec) = unit.adaptive.as_ref() else {
            return false;
        };
        let Some(level) = self.params.get_f64(&spec.variable) else {
            self.ctx.report(&CoreError::Unit(format!(
                "adaptive block `{}` has no numeric `{}`",
                unit.name, spec.variable
            )));
            return false;
        };
        let step = spec
            .step
            .as_deref()
            .and_then(|p| self.params.get_f64(p))
            .unwrap_or(spec.min_step);
        let stop_key = spec
            .stop_key
            .as_deref()
            .and_then(|p| self.params.get_bool(p))
            .unwrap_or(false);

        if !evaluator.observe(level, step, stop_key) {
            return false;
        }
        tracing::info!(
            "adaptive block `{}` converged after {} trials ({} turning points)",
            unit.name,
            evaluator.history().len(),
            evaluator.turning_points()
        );
        self.report.adaptive_stops.push(AdaptiveStop {
            block: unit.name.clone(),
            trials: evaluator.history().len(),
            turning_points: evaluator.turning_points(),
        });
        true
    }

    fn run_list(&mut self, unit: &Unit, list: ListKind) -> UnitState {
        self.report.count_list(unit.kind, list);
        let state = self
            .executor
            .run_list(unit, list, &mut self.params, &mut self.ctx);
        tracing::trace!("{} `{}` {:?} list: {:?}", unit.kind, unit.name, list, state);
        state
    }

    /// Checks the slots from the root down to `kind` for a stop request.
    fn pending_stop(&mut self, kind: UnitKind) -> bool {
        let requested = UnitKind::ALL
            .into_iter()
            .take_while(|&k| k <= kind)
            .find(|k| self.params.get_state(k.slot()).is_stop());
        match requested {
            Some(origin) => {
                self.stop_origin.get_or_insert(origin);
                true
            }
            None => self.stop_origin.is_some(),
        }
    }
}

fn validate(procedure: &Unit) -> Result<()> {
    if procedure.kind != UnitKind::Procedure {
        return Err(ProcedureError::RootNotProcedure(procedure.kind));
    }
    check_unit(procedure)
}

fn check_unit(unit: &Unit) -> Result<()> {
    if unit.adaptive.is_some() && unit.kind != UnitKind::Block {
        return Err(ProcedureError::MisplacedAdaptive {
            kind: unit.kind,
            name: unit.name.clone(),
        });
    }
    for child in &unit.children {
        if unit.kind.child_kind() != Some(child.kind) {
            return Err(ProcedureError::InvalidNesting {
                parent: unit.kind,
                name: unit.name.clone(),
                child: child.kind,
            });
        }
        check_unit(child)?;
    }
    Ok(())
}
