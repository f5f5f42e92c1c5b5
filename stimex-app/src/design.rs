use rand::Rng;
use rand::seq::SliceRandom;
use stimex_procedure::{AdaptiveSpec, StopRule, Unit, UnitModifiers};

const TRIALS_PER_BLOCK: usize = 3;
const STAIRCASE_TRIALS: usize = 40;

fn trial(block: &str, index: usize, direction: &str) -> Unit {
    Unit::trial(format!("{block}-{index}"))
        .with_param("direction", direction)
        .with_param("rt_ms", -1.0)
        .with_param("correct", false)
}

fn random_direction(rng: &mut impl Rng) -> &'static str {
    if rng.random_bool(0.5) { "left" } else { "right" }
}

/// Practice and main block of arrow trials, then a one-up one-down
/// staircase on stimulus contrast that ends after four reversals.
pub fn demo_procedure(rng: &mut impl Rng) -> Unit {
    let practice = Unit::block("practice")
        .with_modifiers(UnitModifiers::FIRST_BLOCK)
        .with_param("repeat_misses", true)
        .with_children((0..TRIALS_PER_BLOCK).map(|i| trial("practice", i, random_direction(rng))));

    let mut main_trials: Vec<Unit> = (0..TRIALS_PER_BLOCK)
        .map(|i| trial("main", i, if i % 2 == 0 { "left" } else { "right" }))
        .collect();
    main_trials.shuffle(rng);
    let main = Unit::block("main")
        .with_modifiers(UnitModifiers::RANDOM_FACTOR)
        .with_children(main_trials);

    let staircase = Unit::block("staircase")
        .with_modifiers(UnitModifiers::LAST_BLOCK)
        .with_param("level", 8.0)
        .with_param("step", 1.0)
        .with_adaptive(AdaptiveSpec::new("level", StopRule::Turnpoints, 4).with_step("step", 1.0))
        .with_children((0..STAIRCASE_TRIALS).map(|i| trial("staircase", i, random_direction(rng))));

    Unit::procedure("arrow-demo").with_child(
        Unit::session("session-1")
            .with_child(practice)
            .with_child(main)
            .with_child(staircase),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use stimex_procedure::UnitKind;

    #[test]
    fn demo_has_two_fixed_blocks_and_a_staircase() {
        let procedure = demo_procedure(&mut StdRng::seed_from_u64(1));
        let blocks = procedure.children()[0].children();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.kind() == UnitKind::Block));
        assert_eq!(blocks[0].children().len(), TRIALS_PER_BLOCK);
        assert_eq!(blocks[1].children().len(), TRIALS_PER_BLOCK);
        assert!(blocks[2].adaptive().is_some());
        assert_eq!(procedure.trial_count(), 2 * TRIALS_PER_BLOCK + STAIRCASE_TRIALS);
    }
}
