use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use stimex_core::{RecordingSink, RuntimeConfig, RuntimeContext, UnitState};
use stimex_present::ShapeStimulus;
use stimex_procedure::{
    AdaptiveSpec, BLOCK_STATE, ListKind, PROCEDURE_STATE, ParamValue, ParameterTable,
    ProcedureError, ProcedureStateMachine, RunReport, SESSION_STATE, StopRule, TRIAL_STATE, Unit,
    UnitExecutor, UnitKind, UnitModifiers,
};

/// Executor that replays scripted states and parameter writes.
#[derive(Default)]
struct Script {
    log: Vec<String>,
    /// States returned by successive runs of one list, `Execute` once drained.
    states: HashMap<(String, ListKind), VecDeque<UnitState>>,
    /// Parameters written every time a trial's main list runs.
    writes: HashMap<String, Vec<(&'static str, ParamValue)>>,
    /// Value of `x` seen when each trial started.
    seen_x: Vec<(String, Option<ParamValue>)>,
}

impl Script {
    fn returns(mut self, name: &str, list: ListKind, states: &[UnitState]) -> Self {
        self.states
            .insert((name.to_owned(), list), states.iter().copied().collect());
        self
    }

    fn writes(mut self, trial: &str, name: &'static str, value: impl Into<ParamValue>) -> Self {
        self.writes
            .entry(trial.to_owned())
            .or_default()
            .push((name, value.into()));
        self
    }
}

impl UnitExecutor for Script {
    type Display = ShapeStimulus;

    fn run_list(
        &mut self,
        unit: &Unit,
        list: ListKind,
        params: &mut ParameterTable,
        _ctx: &mut RuntimeContext<ShapeStimulus>,
    ) -> UnitState {
        self.log
            .push(format!("{} {:?} {}", unit.kind(), list, unit.name()));
        if list == ListKind::Main {
            self.seen_x
                .push((unit.name().to_owned(), params.get("x").cloned()));
            for (name, value) in self.writes.get(unit.name()).into_iter().flatten() {
                params.set(name, value.clone());
            }
        }
        self.states
            .get_mut(&(unit.name().to_owned(), list))
            .and_then(VecDeque::pop_front)
            .unwrap_or_default()
    }
}

fn design(blocks: usize, trials: usize) -> Unit {
    let session = Unit::session("s").with_children((1..=blocks).map(|b| {
        Unit::block(format!("b{b}")).with_children(
            (1..=trials).map(|t| Unit::trial(format!("b{b}t{t}")).with_param("x", t as i64)),
        )
    }));
    Unit::procedure("p").with_child(session)
}

fn machine(
    script: Script,
    config: RuntimeConfig,
) -> (ProcedureStateMachine<Script, StdRng>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let ctx = RuntimeContext::new(config).with_error_sink(sink.clone());
    let machine = ProcedureStateMachine::new(script, ctx, StdRng::seed_from_u64(7));
    (machine, sink)
}

fn run(script: Script, procedure: &mut Unit) -> (RunReport, Script) {
    let (mut m, _) = machine(script, RuntimeConfig::default());
    let report = m.run(procedure).unwrap();
    let (script, _) = m.into_parts();
    (report, script)
}

fn block_children(procedure: &Unit, block: usize) -> &[Unit] {
    procedure.children()[0].children()[block].children()
}

#[test]
fn two_blocks_run_six_trials_in_block_major_order() {
    let mut procedure = design(2, 3);
    let (report, script) = run(Script::default(), &mut procedure);

    assert_eq!(
        report.trial_names(),
        vec!["b1t1", "b1t2", "b1t3", "b2t1", "b2t2", "b2t3"]
    );
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::Start), 2);
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 2);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::Start), 1);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Trial, ListKind::Main), 6);
    assert_eq!(report.stop_origin, None);
    assert_eq!(report.insertions, 0);

    assert_eq!(
        &script.log[..4],
        ["procedure Start p", "session Start s", "block Start b1", "trial Main b1t1"]
    );
    assert_eq!(
        &script.log[script.log.len() - 3..],
        ["block End b2", "session End s", "procedure End p"]
    );
    assert!(report.trials.iter().take(3).all(|t| t.block == "b1"));
    assert!(report.trials.iter().all(|t| t.finished_at >= t.started_at));
}

#[test]
fn repeat_runs_a_pristine_clone_next() {
    let mut procedure = design(2, 3);
    let script = Script::default()
        .returns("b1t2", ListKind::Main, &[UnitState::Repeat])
        .writes("b1t2", "x", 99);
    let (report, script) = run(script, &mut procedure);

    assert_eq!(
        report.trial_names(),
        vec!["b1t1", "b1t2", "b1t2", "b1t3", "b2t1", "b2t2", "b2t3"]
    );
    let seen: Vec<_> = script
        .seen_x
        .iter()
        .filter(|(n, _)| n == "b1t2")
        .map(|(_, x)| x.clone())
        .collect();
    assert_eq!(seen, vec![Some(ParamValue::Int(2)), Some(ParamValue::Int(2))]);

    assert_eq!(block_children(&procedure, 0).len(), 4);
    assert_eq!(block_children(&procedure, 0)[2].param("x"), Some(&ParamValue::Int(2)));
    assert_eq!(procedure.trial_count(), 7);
    assert_eq!(report.insertions, 1);
}

#[test]
fn copy_carries_post_execution_values() {
    let mut procedure = design(1, 2);
    let script = Script::default()
        .returns("b1t1", ListKind::Main, &[UnitState::Copy])
        .writes("b1t1", "x", 42);
    let (report, script) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t1", "b1t2"]);
    assert_eq!(script.seen_x[0].1, Some(ParamValue::Int(1)));
    assert_eq!(script.seen_x[1].1, Some(ParamValue::Int(42)));
    assert_eq!(block_children(&procedure, 0)[1].param("x"), Some(&ParamValue::Int(42)));
}

#[test]
fn stop_in_a_trial_runs_each_enclosing_end_list_once() {
    let mut procedure = design(2, 3);
    let script = Script::default().returns("b1t2", ListKind::Main, &[UnitState::Stop]);
    let (report, script) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t2"]);
    assert_eq!(report.stop_origin, Some(UnitKind::Trial));
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::Start), 1);
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 1);
    assert_eq!(
        &script.log[script.log.len() - 3..],
        ["block End b1", "session End s", "procedure End p"]
    );
}

#[test]
fn block_state_stop_skips_that_block_end_list() {
    let mut procedure = design(2, 3);
    let script = Script::default().writes("b1t2", BLOCK_STATE, UnitState::Stop);
    let (report, _) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t2"]);
    assert_eq!(report.stop_origin, Some(UnitKind::Block));
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 0);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 1);
}

#[test]
fn stop_from_a_session_start_list_skips_its_end_list() {
    let mut procedure = design(2, 3);
    let script = Script::default().returns("s", ListKind::Start, &[UnitState::Stop]);
    let (report, _) = run(script, &mut procedure);

    assert!(report.trials.is_empty());
    assert_eq!(report.stop_origin, Some(UnitKind::Session));
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 0);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 1);
}

#[test]
fn break_ends_only_the_enclosing_block() {
    let mut procedure = design(2, 3);
    let script = Script::default().returns("b1t1", ListKind::Main, &[UnitState::Break]);
    let (report, _) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b2t1", "b2t2", "b2t3"]);
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 2);
    assert_eq!(report.stop_origin, None);
}

#[test]
fn block_state_break_ends_the_block_loop() {
    let mut procedure = design(2, 3);
    let script = Script::default().writes("b2t2", BLOCK_STATE, UnitState::Break);
    let (report, _) = run(script, &mut procedure);

    assert_eq!(
        report.trial_names(),
        vec!["b1t1", "b1t2", "b1t3", "b2t1", "b2t2"]
    );
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 1);
}

#[test]
fn session_state_stop_skips_block_and_session_end_lists() {
    let mut procedure = design(2, 3);
    let script = Script::default().writes("b1t2", SESSION_STATE, UnitState::Stop);
    let (report, _) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t2"]);
    assert_eq!(report.stop_origin, Some(UnitKind::Session));
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 0);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 0);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 1);
}

#[test]
fn session_state_break_finishes_the_block_then_ends_the_session_loop() {
    let mut procedure = design(3, 3);
    let script = Script::default().writes("b1t2", SESSION_STATE, UnitState::Break);
    let (report, _) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t2", "b1t3"]);
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::Start), 1);
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 1);
    assert_eq!(report.stop_origin, None);
}

#[test]
fn procedure_state_stop_skips_every_end_list() {
    let mut procedure = design(2, 3);
    let script = Script::default().writes("b2t1", PROCEDURE_STATE, UnitState::Stop);
    let (report, script) = run(script, &mut procedure);

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t2", "b1t3", "b2t1"]);
    assert_eq!(report.stop_origin, Some(UnitKind::Procedure));
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 1);
    assert_eq!(report.list_runs(UnitKind::Session, ListKind::End), 0);
    assert_eq!(report.list_runs(UnitKind::Procedure, ListKind::End), 0);
    assert_eq!(script.log.last().map(String::as_str), Some("trial Main b2t1"));
}

#[test]
fn trial_state_merges_into_the_trial_code() {
    let mut procedure = design(1, 2);
    // The slot is written on every run of b1t1; the clone breaks out.
    let script = Script::default()
        .returns("b1t1", ListKind::Main, &[UnitState::Execute, UnitState::Break])
        .writes("b1t1", TRIAL_STATE, UnitState::Repeat);
    let mut m = machine(script, RuntimeConfig::default()).0;
    let report = m.run(&mut procedure).unwrap();

    assert_eq!(report.trial_names(), vec!["b1t1", "b1t1"]);
    assert_eq!(report.trials[0].state, UnitState::Repeat);
    assert_eq!(report.trials[1].state, UnitState::Break);
}

#[test]
fn errors_are_reported_but_repeat_only_when_configured() {
    let script = || Script::default().returns("b1t2", ListKind::Main, &[UnitState::Error]);

    let mut procedure = design(2, 3);
    let (mut m, sink) = machine(script(), RuntimeConfig::default());
    let report = m.run(&mut procedure).unwrap();
    assert_eq!(report.trials.len(), 6);
    assert_eq!(report.errors, 1);
    assert_eq!(sink.len(), 1);
    assert!(sink.messages()[0].contains("b1t2"));

    let mut procedure = design(2, 3);
    let config = RuntimeConfig {
        repeat_error_trials: true,
        ..RuntimeConfig::default()
    };
    let (mut m, sink) = machine(script(), config);
    let report = m.run(&mut procedure).unwrap();
    assert_eq!(
        report.trial_names(),
        vec!["b1t1", "b1t2", "b1t2", "b1t3", "b2t1", "b2t2", "b2t3"]
    );
    assert_eq!(report.errors, 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn randomized_block_repeats_errors_among_remaining_trials() {
    let block = Unit::block("b1")
        .with_modifiers(UnitModifiers::RANDOM_FACTOR)
        .with_children((1..=5).map(|t| Unit::trial(format!("b1t{t}"))));
    let mut procedure = Unit::procedure("p").with_child(Unit::session("s").with_child(block));
    let config = RuntimeConfig {
        repeat_error_trials: true,
        ..RuntimeConfig::default()
    };
    let script = Script::default().returns("b1t1", ListKind::Main, &[UnitState::Error]);
    let (mut m, _) = machine(script, config);
    let report = m.run(&mut procedure).unwrap();

    let names = report.trial_names();
    assert_eq!(names.len(), 6);
    let runs: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == "b1t1")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0], 0);
    assert!(runs[1] >= 1);
    for t in 2..=5 {
        assert!(names.contains(&format!("b1t{t}").as_str()));
    }
}

#[test]
fn stop_dominates_an_error_raised_by_the_same_trial() {
    let mut procedure = design(1, 3);
    let script = Script::default()
        .returns("b1t1", ListKind::Main, &[UnitState::Error])
        .writes("b1t1", TRIAL_STATE, UnitState::Stop);
    let config = RuntimeConfig {
        repeat_error_trials: true,
        ..RuntimeConfig::default()
    };
    let (mut m, sink) = machine(script, config);
    let report = m.run(&mut procedure).unwrap();

    assert_eq!(report.trial_names(), vec!["b1t1"]);
    assert_eq!(report.trials[0].state, UnitState::Stop);
    assert_eq!(report.errors, 0);
    assert!(sink.is_empty());
}

#[test]
fn adaptive_block_stops_at_the_second_turning_point() {
    const LEVELS: [f64; 7] = [5.0, 6.0, 7.0, 6.0, 5.0, 4.0, 5.0];
    let mut script = Script::default();
    for k in 0..10 {
        script = script.writes(&format!("s{k}"), "level", LEVELS[k % LEVELS.len()]);
    }
    let staircase = Unit::block("stair")
        .with_param("level", 5.0)
        .with_adaptive(AdaptiveSpec::new("level", StopRule::Turnpoints, 2))
        .with_children((0..10).map(|k| Unit::trial(format!("s{k}"))));
    let mut procedure = Unit::procedure("p").with_child(
        Unit::session("s")
            .with_child(staircase)
            .with_child(Unit::block("after").with_child(Unit::trial("a1"))),
    );
    let (report, _) = run(script, &mut procedure);

    assert_eq!(report.trials.len(), 8);
    assert_eq!(report.trials[6].name, "s6");
    assert_eq!(report.trials[7].name, "a1");
    assert_eq!(report.adaptive_stops.len(), 1);
    assert_eq!(report.adaptive_stops[0].block, "stair");
    assert_eq!(report.adaptive_stops[0].trials, 7);
    assert_eq!(report.adaptive_stops[0].turning_points, 2);
    assert_eq!(report.list_runs(UnitKind::Block, ListKind::End), 2);
}

#[test]
fn malformed_trees_are_rejected() {
    let (mut m, _) = machine(Script::default(), RuntimeConfig::default());

    let mut root = Unit::block("b");
    assert!(matches!(
        m.run(&mut root),
        Err(ProcedureError::RootNotProcedure(UnitKind::Block))
    ));

    let mut skipped = Unit::procedure("p").with_child(Unit::trial("t"));
    assert!(matches!(
        m.run(&mut skipped),
        Err(ProcedureError::InvalidNesting {
            parent: UnitKind::Procedure,
            child: UnitKind::Trial,
            ..
        })
    ));

    let mut adaptive = Unit::procedure("p").with_child(
        Unit::session("s").with_adaptive(AdaptiveSpec::new("level", StopRule::Turnpoints, 2)),
    );
    assert!(matches!(
        m.run(&mut adaptive),
        Err(ProcedureError::MisplacedAdaptive {
            kind: UnitKind::Session,
            ..
        })
    ));
    assert!(m.executor().log.is_empty());
}
