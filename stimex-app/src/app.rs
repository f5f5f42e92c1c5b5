use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use stimex_core::{RuntimeConfig, RuntimeContext, Shared, shared};
use stimex_present::PixmapDevice;
use stimex_procedure::{ParamValue, ProcedureStateMachine, RunReport};

use crate::design::demo_procedure;
use crate::executor::{DemoExecutor, HEIGHT, WIDTH};

pub struct App {
    config: RuntimeConfig,
    device: Shared<PixmapDevice>,
    output: Option<PathBuf>,
}

impl App {
    pub fn new(config: RuntimeConfig, output: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let device = PixmapDevice::new(WIDTH, HEIGHT).context("allocating the software device")?;
        Ok(Self {
            config,
            device: shared(device),
            output,
        })
    }

    pub fn run(self) -> Result<()> {
        tracing::info!("=== STIMEX PRESENTATION DEMO ===");
        tracing::info!(
            "platform {} / {}, refresh {:.1} Hz, seed {:?}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            self.config.refresh_rate_hz,
            self.config.seed
        );

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut procedure = demo_procedure(&mut rng);
        let executor = DemoExecutor::new(self.device.clone(), rng);
        let ctx = RuntimeContext::new(self.config.clone());
        let mut machine = ProcedureStateMachine::seeded(executor, ctx);

        let report = machine.run(&mut procedure)?;
        log_summary(&report);

        if let Some(dir) = &self.output {
            self.write_output(dir, &report)?;
        }
        Ok(())
    }

    fn write_output(&self, dir: &Path, report: &RunReport) -> Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let report_path = dir.join("report.json");
        std::fs::write(&report_path, report.to_json()?)
            .with_context(|| format!("writing {}", report_path.display()))?;

        let frame_path = dir.join("last_frame.png");
        let device = self.device.lock();
        if let Some(frame) = device.front(device.active_screen()) {
            frame
                .save_png(&frame_path)
                .with_context(|| format!("writing {}", frame_path.display()))?;
        }
        tracing::info!("wrote {} and {}", report_path.display(), frame_path.display());
        Ok(())
    }
}

#[derive(Default)]
struct BlockSummary {
    trials: usize,
    correct: usize,
    rt_total_ms: f64,
    responses: usize,
}

fn log_summary(report: &RunReport) {
    let mut blocks: BTreeMap<&str, BlockSummary> = BTreeMap::new();
    for trial in &report.trials {
        let summary = blocks.entry(trial.block.as_str()).or_default();
        summary.trials += 1;
        if trial.params.get("correct") == Some(&ParamValue::Bool(true)) {
            summary.correct += 1;
        }
        if let Some(rt) = trial.params.get("rt_ms").and_then(ParamValue::as_f64) {
            if rt >= 0.0 {
                summary.rt_total_ms += rt;
                summary.responses += 1;
            }
        }
    }

    for (name, s) in &blocks {
        let mean_rt = if s.responses > 0 {
            s.rt_total_ms / s.responses as f64
        } else {
            f64::NAN
        };
        tracing::info!(
            "block `{}`: {} trials, {} correct, mean rt {:.1} ms",
            name,
            s.trials,
            s.correct,
            mean_rt
        );
    }
    for stop in &report.adaptive_stops {
        tracing::info!(
            "staircase `{}` converged after {} trials ({} turning points)",
            stop.block,
            stop.trials,
            stop.turning_points
        );
    }
    if report.errors > 0 {
        tracing::warn!("{} units reported errors", report.errors);
    }
    tracing::info!(
        "{} trials, {} repeats/copies, stopped early: {}",
        report.trials.len(),
        report.insertions,
        report.stopped()
    );
}
