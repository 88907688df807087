// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Owns the generator and test selection and drives the tests on the job pool.
//!
//! A display layer calls `step()` once per frame and reads the results:
//! the fill canvas, one collision ratio per (layout, bit plane) cell, or
//! one gorilla sd ratio per bit plane.

use std::{fmt, str::FromStr};

use crossbeam::channel;
use tracing::{error, info, warn};

use crate::{
    collision::{CollisionCell, CollisionTest},
    config::BenchConfig,
    error::{BenchError, Result},
    fill::{self, FillCanvas, Rgb},
    gorilla::{GorillaConfig, GorillaReport, GorillaRun},
    job_pool::{JobPool, Teardown},
    rngs::{Generator, GeneratorKind},
    strings,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum TestMode {
    #[default]
    Fill,
    Collision,
    Gorilla,
}

impl TestMode {
    pub const ALL: [TestMode; 3] = [TestMode::Fill, TestMode::Collision, TestMode::Gorilla];

    pub fn name(self) -> &'static str {
        strings::TEST_NAMES[self as usize]
    }

    /// Next mode in the selection cycle.
    pub fn cycle(self) -> TestMode {
        match self {
            TestMode::Fill => TestMode::Collision,
            TestMode::Collision => TestMode::Gorilla,
            TestMode::Gorilla => TestMode::Fill,
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        TestMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| BenchError::UnknownTestMode(s.to_owned()))
    }
}

/// Complete bench state: selection, lanes, accumulated results.
pub struct Bench {
    config: BenchConfig,
    gorilla_config: GorillaConfig,
    pool: JobPool,
    kind: GeneratorKind,
    mode: TestMode,
    /// One generator per worker. Empty while lent to a gorilla run.
    lanes: Vec<Generator>,
    canvas: FillCanvas,
    collision: CollisionTest,
    gorilla: Option<GorillaRun>,
}

impl Bench {
    pub fn new(config: BenchConfig) -> Result<Self> {
        config.validate()?;
        let gorilla_config = config.gorilla()?;
        let pool = JobPool::new(config.worker_count)?;
        let kind = GeneratorKind::default();
        info!(
            "Bench started: {} workers, generator {}, test {}",
            config.worker_count,
            kind,
            TestMode::default()
        );
        Ok(Bench {
            lanes: Generator::lanes(kind, config.worker_count),
            canvas: FillCanvas::new(config.width, config.height, config.worker_count),
            collision: CollisionTest::new(),
            gorilla: None,
            gorilla_config,
            pool,
            kind,
            mode: TestMode::default(),
            config,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn generator(&self) -> GeneratorKind {
        self.kind
    }

    pub fn test_mode(&self) -> TestMode {
        self.mode
    }

    /// Switch generator, reseed every lane and drop all results.
    pub fn set_generator(&mut self, kind: GeneratorKind) -> Result<()> {
        info!("Generator: {}", kind);
        self.kind = kind;
        self.gorilla = None;
        self.lanes = Generator::lanes(kind, self.config.worker_count);
        self.reset();
        self.launch_if_gorilla()
    }

    /// Switch test mode and drop all results. Lanes keep their state.
    pub fn set_test_mode(&mut self, mode: TestMode) -> Result<()> {
        info!("Test mode: {}", mode);
        self.mode = mode;
        self.reset();
        self.launch_if_gorilla()
    }

    pub fn cycle_generator(&mut self) -> Result<()> {
        self.set_generator(self.kind.cycle())
    }

    pub fn cycle_test_mode(&mut self) -> Result<()> {
        self.set_test_mode(self.mode.cycle())
    }

    /// One frame of work: a fill pass, a collision frame, or advancing the gorilla run.
    pub fn step(&mut self) -> Result<()> {
        let result = match self.mode {
            TestMode::Fill => self.step_fill(),
            TestMode::Collision => {
                self.ensure_lanes();
                self.collision.run_frame(&mut self.lanes[0]);
                Ok(())
            }
            TestMode::Gorilla => self.poll_gorilla().map(|_| ()),
        };
        result.map_err(|e| self.abort(e))
    }

    /// Start a full gorilla run in the background, replacing any previous one.
    pub fn run_gorilla(&mut self) -> Result<()> {
        self.gorilla = None;
        self.ensure_lanes();
        let lanes = std::mem::take(&mut self.lanes);
        let run = GorillaRun::start(
            &self.pool,
            lanes,
            self.gorilla_config,
            self.config.sync_timeout,
        );
        match run {
            Ok(run) => {
                self.gorilla = Some(run);
                Ok(())
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Completion predicate for the current gorilla run.
    pub fn gorilla_complete(&self) -> bool {
        self.gorilla.as_ref().is_some_and(GorillaRun::is_complete)
    }

    /// Advance the gorilla run without blocking, true once it is done.
    pub fn poll_gorilla(&mut self) -> Result<bool> {
        let Some(run) = self.gorilla.as_mut() else {
            return Ok(false);
        };
        let done = run.poll(&self.pool);
        if let Some(lanes) = run.take_lanes() {
            self.lanes = lanes;
        }
        done.map_err(|e| self.abort(e))
    }

    /// Block until the gorilla run is done.
    pub fn wait_gorilla(&mut self) -> Result<&GorillaReport> {
        if self.gorilla.is_none() {
            self.run_gorilla()?;
        }
        let waited = match self.gorilla.as_mut() {
            Some(run) => {
                let waited = run.wait(&self.pool).map(|_| ());
                if let Some(lanes) = run.take_lanes() {
                    self.lanes = lanes;
                }
                waited
            }
            None => Ok(()),
        };
        waited.map_err(|e| self.abort(e))?;
        self.gorilla_report()
            .ok_or_else(|| BenchError::sync_fault("gorilla report", self.config.sync_timeout))
    }

    pub fn canvas(&self) -> &FillCanvas {
        &self.canvas
    }

    /// Fill result as rows of RGB triples.
    pub fn fill_grid(&self) -> Vec<Vec<Rgb>> {
        self.canvas.grid()
    }

    pub fn collision_frames(&self) -> u64 {
        self.collision.frame_count()
    }

    pub fn collision_report(&self) -> Vec<CollisionCell> {
        self.collision.report()
    }

    pub fn gorilla_report(&self) -> Option<&GorillaReport> {
        self.gorilla.as_ref().and_then(GorillaRun::report)
    }

    /// One sd ratio per bit plane once the gorilla run is done.
    pub fn gorilla_scores(&self) -> Option<Vec<f64>> {
        self.gorilla_report().map(GorillaReport::sd_ratios)
    }

    /// Stop any gorilla run and tear down the worker pool.
    pub fn dispose(mut self) -> Teardown {
        self.gorilla = None;
        let teardown = self.pool.dispose();
        if teardown.abnormal_exits > 0 {
            warn!("{} workers exited abnormally", teardown.abnormal_exits);
        }
        teardown
    }

    fn reset(&mut self) {
        self.gorilla = None;
        self.canvas.clear();
        self.collision.reset();
        self.ensure_lanes();
    }

    fn launch_if_gorilla(&mut self) -> Result<()> {
        if self.mode == TestMode::Gorilla {
            self.run_gorilla()
        } else {
            Ok(())
        }
    }

    /// Lanes lent to an abandoned gorilla run are lost, start over from the seeds.
    fn ensure_lanes(&mut self) {
        if self.lanes.len() != self.config.worker_count {
            self.lanes = Generator::lanes(self.kind, self.config.worker_count);
        }
        if self.canvas.band_count() != self.config.worker_count {
            self.canvas.rebuild(self.config.worker_count);
        }
    }

    /// Abort the current run on a fatal error.
    fn abort(&mut self, e: BenchError) -> BenchError {
        if e.is_fatal() {
            error!("Aborting {} run: {}", self.mode, e);
            self.gorilla = None;
        }
        self.ensure_lanes();
        e
    }

    /// Fixed batch of one job per lane, each owning its generator and band.
    fn step_fill(&mut self) -> Result<()> {
        self.ensure_lanes();
        let width = self.config.width;
        let iterations = self.config.pixels_per_lane;
        let lanes = std::mem::take(&mut self.lanes);
        let bands = self.canvas.take_bands();
        let (tx, rx) = channel::unbounded();
        let jobs: Vec<_> = lanes
            .into_iter()
            .zip(bands)
            .enumerate()
            .map(|(lane, (mut test_rng, mut band))| {
                let tx = tx.clone();
                move || {
                    fill::fill_band(&mut band, width, &mut test_rng, iterations);
                    let _ = tx.send((lane, test_rng, band));
                }
            })
            .collect();
        drop(tx);
        self.pool.run_batch(jobs, "fill", self.config.sync_timeout)?;

        let mut returned: Vec<_> = rx.try_iter().collect();
        if returned.len() != self.config.worker_count {
            warn!(
                "Fill batch returned {} of {} lanes, starting over",
                returned.len(),
                self.config.worker_count
            );
            self.ensure_lanes();
            return Ok(());
        }
        returned.sort_by_key(|(lane, _, _)| *lane);
        let (lanes, bands): (Vec<Generator>, Vec<Vec<Rgb>>) = returned
            .into_iter()
            .map(|(_, test_rng, band)| (test_rng, band))
            .unzip();
        self.lanes = lanes;
        self.canvas.restore_bands(bands);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fill::BLACK, gorilla::BIT_PLANES};

    fn small_config() -> BenchConfig {
        BenchConfig {
            width: 64,
            height: 32,
            pixels_per_lane: 500,
            gorilla_shortening: 12,
            ..Default::default()
        }
    }

    #[test]
    fn initial_state() {
        let bench = Bench::new(small_config()).unwrap();
        assert_eq!(bench.generator(), GeneratorKind::XorShift32);
        assert_eq!(bench.test_mode(), TestMode::Fill);
        assert!(bench.collision_report().is_empty());
        assert!(bench.gorilla_scores().is_none());
        assert!(!bench.gorilla_complete());
    }

    #[test]
    fn invalid_config_rejected() {
        let config = BenchConfig {
            height: 33,
            ..small_config()
        };
        assert!(Bench::new(config).is_err());
    }

    #[test]
    fn test_mode_parse_and_cycle() {
        assert_eq!("collision".parse::<TestMode>().unwrap(), TestMode::Collision);
        assert!(matches!(
            "Spectral".parse::<TestMode>(),
            Err(BenchError::UnknownTestMode(_))
        ));
        assert_eq!(TestMode::Gorilla.cycle(), TestMode::Fill);
        assert_eq!(TestMode::Fill.to_string(), "Fill");
    }

    #[test]
    fn fill_paints_and_resets() {
        let mut bench = Bench::new(small_config()).unwrap();
        bench.step().unwrap();
        let grid = bench.fill_grid();
        assert_eq!(grid.len(), 32);
        assert_eq!(grid[0].len(), 64);
        let painted = grid.iter().flatten().filter(|&&p| p != BLACK).count();
        assert!(painted > 0);
        // every band is painted by its own lane
        for band in 0..4 {
            let rows = &grid[band * 8..(band + 1) * 8];
            assert!(rows.iter().flatten().any(|&p| p != BLACK));
        }
        bench.cycle_generator().unwrap();
        assert_eq!(bench.generator(), GeneratorKind::Mwc32);
        assert!(bench.fill_grid().iter().flatten().all(|&p| p == BLACK));
    }

    #[test]
    fn fill_is_deterministic_per_generator() {
        let mut a = Bench::new(small_config()).unwrap();
        let mut b = Bench::new(small_config()).unwrap();
        for _ in 0..3 {
            a.step().unwrap();
            b.step().unwrap();
        }
        assert_eq!(a.canvas().to_bytes(), b.canvas().to_bytes());
    }

    #[test]
    fn collision_frames_accumulate_until_switch() {
        let mut bench = Bench::new(small_config()).unwrap();
        bench.set_test_mode(TestMode::Collision).unwrap();
        bench.step().unwrap();
        bench.step().unwrap();
        assert_eq!(bench.collision_frames(), 2);
        assert_eq!(bench.collision_report().len(), 31);
        bench.set_generator(GeneratorKind::PopularLcg).unwrap();
        assert_eq!(bench.collision_frames(), 0);
        assert!(bench.collision_report().is_empty());
    }

    #[test]
    fn gorilla_launches_on_switch_and_polls_to_completion() {
        let mut bench = Bench::new(small_config()).unwrap();
        bench.set_test_mode(TestMode::Gorilla).unwrap();
        while !bench.gorilla_complete() {
            bench.step().unwrap();
            std::thread::yield_now();
        }
        let scores = bench.gorilla_scores().unwrap();
        assert_eq!(scores.len(), BIT_PLANES);
        // switching generator starts a fresh run
        bench.cycle_generator().unwrap();
        assert!(!bench.gorilla_complete());
        let report = bench.wait_gorilla().unwrap();
        assert_eq!(report.planes.len(), BIT_PLANES);
    }

    #[test]
    fn leaving_gorilla_mid_run_recovers_lanes() {
        let mut bench = Bench::new(small_config()).unwrap();
        bench.set_test_mode(TestMode::Gorilla).unwrap();
        bench.set_test_mode(TestMode::Fill).unwrap();
        bench.step().unwrap();
        assert!(bench.fill_grid().iter().flatten().any(|&p| p != BLACK));
        assert_eq!(bench.dispose().abnormal_exits, 0);
    }

    #[test]
    fn every_generator_every_mode() {
        let mut bench = Bench::new(small_config()).unwrap();
        for _ in GeneratorKind::ALL {
            for _ in TestMode::ALL {
                bench.step().unwrap();
                if bench.test_mode() == TestMode::Gorilla {
                    bench.wait_gorilla().unwrap();
                }
                bench.cycle_test_mode().unwrap();
            }
            bench.cycle_generator().unwrap();
        }
        assert_eq!(bench.generator(), GeneratorKind::XorShift32);
    }
}
