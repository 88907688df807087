// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Gorilla test (Marsaglia & Tsang, "Some difficult-to-pass tests of randomness").
//!
//! For every bit plane the stream of that bit over 2^L + L - 1 outputs is
//! cut into 2^L overlapping L-bit windows. The number of window values that
//! never appear is approximately normal with mean 2^L / e and the published
//! standard deviation 4170 for L = 26.
//!
//! Shortened windows keep the display convention of shifting both constants
//! down by the shortening. The standard deviation really shrinks like
//! 2^(L/2), so verdicts use `z_score` which scales it by the square root.
//!
//! A run has two phases on the job pool:
//! 1. Generate: every lane fills one contiguous chunk of the shared buffer.
//! 2. Score: one job per bit plane scans the complete buffer.

use std::{
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::{
    error::{BenchError, Result},
    job_pool::JobPool,
    rngs::{Generator, Rng16},
    stats,
};

pub const BIT_PLANES: usize = 16;
pub const FULL_STRING_LENGTH: u32 = 26;
/// 2^26 / e, published value.
pub const FULL_IDEAL_MEAN: u64 = 24687971;
/// Published value for L = 26.
pub const FULL_IDEAL_STDEV: u64 = 4170;
/// Beyond this the scaled standard deviation rounds to zero.
pub const MAX_SHORTENING: u32 = 12;
/// Values between checks of the cancel flag in generate and score jobs.
const CANCEL_CHECK_INTERVAL: usize = 1 << 14;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GorillaConfig {
    shortening: u32,
}

impl Default for GorillaConfig {
    fn default() -> Self {
        GorillaConfig { shortening: 0 }
    }
}

impl GorillaConfig {
    /// Window length is 26 - `shortening`, the constants are shifted down alike.
    pub fn new(shortening: u32) -> Result<Self> {
        if shortening > MAX_SHORTENING {
            return Err(BenchError::config(format!(
                "gorilla shortening {} exceeds {}",
                shortening, MAX_SHORTENING
            )));
        }
        Ok(GorillaConfig { shortening })
    }

    /// L, bits per window.
    pub fn string_length(&self) -> u32 {
        FULL_STRING_LENGTH - self.shortening
    }

    /// 2^L, number of windows and of possible window values.
    pub fn string_count(&self) -> usize {
        1 << self.string_length()
    }

    /// Generator outputs needed for 2^L windows.
    pub fn value_count(&self) -> usize {
        self.string_count() + self.string_length() as usize - 1
    }

    pub fn ideal_mean(&self) -> u64 {
        FULL_IDEAL_MEAN >> self.shortening
    }

    /// Display scaling, 4170 >> shortening.
    pub fn ideal_stdev(&self) -> u64 {
        FULL_IDEAL_STDEV >> self.shortening
    }

    /// Standard deviation of the missing count at this window length.
    pub fn expected_stdev(&self) -> f64 {
        FULL_IDEAL_STDEV as f64 / 2f64.powf(self.shortening as f64 / 2.0)
    }

    /// Deviation in units of the display stdev.
    pub fn sd_ratio(&self, missing: u64) -> f64 {
        stats::sd_ratio(
            missing as f64,
            self.ideal_mean() as f64,
            self.ideal_stdev() as f64,
        )
    }

    /// Deviation in units of `expected_stdev`, used for verdicts.
    /// Equal to `sd_ratio` at full length.
    pub fn z_score(&self, missing: u64) -> f64 {
        stats::sd_ratio(
            missing as f64,
            self.ideal_mean() as f64,
            self.expected_stdev(),
        )
    }
}

/// Split `total` items into `workers` contiguous ranges.
/// Every range but the last has `total / workers` items, the last takes the remainder.
pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let unit = total / workers;
    let mut ranges = Vec::with_capacity(workers);
    let mut offset = 0;
    for worker in 0..workers {
        let len = if worker == workers - 1 {
            total - offset
        } else {
            unit
        };
        ranges.push(offset..offset + len);
        offset += len;
    }
    ranges
}

/// Count the `string_length`-bit window values never produced by bit
/// `bit_plane` of `values`. Needs at least 2^L + L - 1 values.
/// Returns `None` once `cancelled` is seen set.
pub fn missing_windows(
    values: impl IntoIterator<Item = u16>,
    bit_plane: u32,
    string_length: u32,
    cancelled: &AtomicBool,
) -> Option<u64> {
    let prologue = string_length as usize - 1;
    let string_count = 1usize << string_length;
    let mask = string_count - 1;
    let mut bits = values
        .into_iter()
        .map(|value| ((value >> bit_plane) & 1) as usize);

    let mut seen = vec![0u64; string_count.div_ceil(64)];
    let mut window = bits
        .by_ref()
        .take(prologue)
        .fold(0usize, |acc, bit| (acc << 1) | bit);
    let mut scanned = 0usize;
    for bit in bits.take(string_count) {
        window = ((window << 1) | bit) & mask;
        seen[window >> 6] |= 1 << (window & 63);
        scanned += 1;
        if scanned % CANCEL_CHECK_INTERVAL == 0 && cancelled.load(Ordering::Relaxed) {
            return None;
        }
    }
    debug_assert_eq!(scanned, string_count);
    let marked: u64 = seen.iter().map(|word| word.count_ones() as u64).sum();
    Some(string_count as u64 - marked)
}

#[derive(Debug, Copy, Clone)]
pub struct PlaneScore {
    pub bit_plane: usize,
    pub missing: u64,
    pub sd_ratio: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone)]
pub struct GorillaReport {
    pub config: GorillaConfig,
    pub planes: Vec<PlaneScore>,
}

impl GorillaReport {
    pub fn sd_ratios(&self) -> Vec<f64> {
        self.planes.iter().map(|plane| plane.sd_ratio).collect()
    }
}

/// Per plane results written by the scoring jobs.
struct Tally {
    missing: [Option<u64>; BIT_PLANES],
    completed: usize,
}

struct ScoreBoard {
    tally: Mutex<Tally>,
    done: Condvar,
}

impl ScoreBoard {
    fn record(&self, bit_plane: usize, missing: u64) {
        let mut tally = self.tally.lock();
        tally.missing[bit_plane] = Some(missing);
        tally.completed += 1;
        debug!("Gorilla test ... {}/{}", tally.completed, BIT_PLANES);
        if tally.completed == BIT_PLANES {
            self.done.notify_all();
        }
    }
}

type Chunk = (usize, Generator, Vec<u16>);

enum Phase {
    Generating {
        rx: Receiver<Chunk>,
        chunks: Vec<Option<Vec<u16>>>,
        lanes: Vec<Option<Generator>>,
        received: usize,
    },
    Scoring {
        board: Arc<ScoreBoard>,
    },
    Done(GorillaReport),
}

/// One in-flight gorilla computation.
/// The lanes are lent to the run and handed back after the generate phase.
/// Dropping the run stops its queued and running jobs early.
pub struct GorillaRun {
    config: GorillaConfig,
    phase: Phase,
    phase_started: Instant,
    timeout: Duration,
    returned_lanes: Option<Vec<Generator>>,
    cancelled: Arc<AtomicBool>,
}

impl GorillaRun {
    /// Queue the generate phase, one job per lane.
    pub fn start(
        pool: &JobPool,
        lanes: Vec<Generator>,
        config: GorillaConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let lane_count = lanes.len();
        let ranges = partition(config.value_count(), lane_count);
        let (tx, rx) = channel::unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        info!(
            "Gorilla test started: L = {}, {} values over {} lanes",
            config.string_length(),
            config.value_count(),
            lane_count
        );
        for (lane, (mut test_rng, range)) in lanes.into_iter().zip(ranges).enumerate() {
            let tx = tx.clone();
            let cancelled = Arc::clone(&cancelled);
            pool.submit(move || {
                let mut chunk = Vec::with_capacity(range.len());
                for _ in range {
                    chunk.push(test_rng.next());
                    if chunk.len() % CANCEL_CHECK_INTERVAL == 0
                        && cancelled.load(Ordering::Relaxed)
                    {
                        return;
                    }
                }
                let _ = tx.send((lane, test_rng, chunk));
            })?;
        }
        Ok(GorillaRun {
            config,
            phase: Phase::Generating {
                rx,
                chunks: vec![None; lane_count],
                lanes: vec![None; lane_count],
                received: 0,
            },
            phase_started: Instant::now(),
            timeout,
            returned_lanes: None,
            cancelled,
        })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, Phase::Done(_))
    }

    pub fn report(&self) -> Option<&GorillaReport> {
        match &self.phase {
            Phase::Done(report) => Some(report),
            _ => None,
        }
    }

    /// Lanes become available once the generate phase has finished.
    pub fn take_lanes(&mut self) -> Option<Vec<Generator>> {
        self.returned_lanes.take()
    }

    /// Advance as far as possible without blocking. Returns true once done.
    pub fn poll(&mut self, pool: &JobPool) -> Result<bool> {
        loop {
            match &mut self.phase {
                Phase::Generating {
                    rx,
                    chunks,
                    lanes,
                    received,
                } => {
                    let mut disconnected = false;
                    while *received < chunks.len() {
                        match rx.try_recv() {
                            Ok(chunk) => {
                                store_chunk(chunk, chunks, lanes);
                                *received += 1;
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => {
                                disconnected = true;
                                break;
                            }
                        }
                    }
                    if *received < chunks.len() {
                        // A lane job died without sending its chunk.
                        if disconnected {
                            return Err(BenchError::sync_fault("gorilla generate", self.timeout));
                        }
                        return self.check_deadline("gorilla generate").map(|_| false);
                    }
                    self.begin_scoring(pool)?;
                }
                Phase::Scoring { board } => {
                    if board.tally.lock().completed < BIT_PLANES {
                        return self.check_deadline("gorilla score").map(|_| false);
                    }
                    self.finish();
                }
                Phase::Done(_) => return Ok(true),
            }
        }
    }

    /// Block until the run is done or a phase exceeds the timeout.
    pub fn wait(&mut self, pool: &JobPool) -> Result<&GorillaReport> {
        loop {
            let deadline = self.phase_started + self.timeout;
            match &mut self.phase {
                Phase::Generating {
                    rx,
                    chunks,
                    lanes,
                    received,
                } => {
                    while *received < chunks.len() {
                        match rx.recv_deadline(deadline) {
                            Ok(chunk) => {
                                store_chunk(chunk, chunks, lanes);
                                *received += 1;
                            }
                            Err(_) => {
                                return Err(BenchError::sync_fault(
                                    "gorilla generate",
                                    self.timeout,
                                ));
                            }
                        }
                    }
                    self.begin_scoring(pool)?;
                }
                Phase::Scoring { board } => {
                    let mut tally = board.tally.lock();
                    while tally.completed < BIT_PLANES {
                        if board.done.wait_until(&mut tally, deadline).timed_out()
                            && tally.completed < BIT_PLANES
                        {
                            return Err(BenchError::sync_fault("gorilla score", self.timeout));
                        }
                    }
                    drop(tally);
                    self.finish();
                }
                Phase::Done(_) => break,
            }
        }
        self.report()
            .ok_or_else(|| BenchError::sync_fault("gorilla report", self.timeout))
    }

    fn check_deadline(&self, stage: &'static str) -> Result<()> {
        if self.phase_started.elapsed() > self.timeout {
            Err(BenchError::sync_fault(stage, self.timeout))
        } else {
            Ok(())
        }
    }

    /// Return the lanes and queue one scan per bit plane over the chunks in lane order.
    fn begin_scoring(&mut self, pool: &JobPool) -> Result<()> {
        let Phase::Generating { chunks, lanes, .. } = &mut self.phase else {
            return Ok(());
        };
        let chunks: Vec<Vec<u16>> = chunks
            .iter_mut()
            .map(|chunk| chunk.take().unwrap_or_default())
            .collect();
        self.returned_lanes = Some(lanes.iter_mut().filter_map(Option::take).collect());
        debug!(
            "Gorilla generate phase done, {} values",
            chunks.iter().map(Vec::len).sum::<usize>()
        );

        let chunks = Arc::new(chunks);
        let board = Arc::new(ScoreBoard {
            tally: Mutex::new(Tally {
                missing: [None; BIT_PLANES],
                completed: 0,
            }),
            done: Condvar::new(),
        });
        let string_length = self.config.string_length();
        for bit_plane in 0..BIT_PLANES {
            let chunks = Arc::clone(&chunks);
            let board = Arc::clone(&board);
            let cancelled = Arc::clone(&self.cancelled);
            pool.submit(move || {
                let values = chunks.iter().flatten().copied();
                if let Some(missing) =
                    missing_windows(values, bit_plane as u32, string_length, &cancelled)
                {
                    board.record(bit_plane, missing);
                }
            })?;
        }
        self.phase = Phase::Scoring { board };
        self.phase_started = Instant::now();
        Ok(())
    }

    fn finish(&mut self) {
        let Phase::Scoring { board } = &self.phase else {
            return;
        };
        let tally = board.tally.lock();
        let planes: Vec<PlaneScore> = tally
            .missing
            .iter()
            .enumerate()
            .map(|(bit_plane, missing)| {
                let missing = missing.unwrap_or_default();
                let sd_ratio = self.config.sd_ratio(missing);
                let z_score = self.config.z_score(missing);
                info!(
                    "[gorilla test result] bit plane: {} missing: {}/{} sd: {:.4} z: {:.4}",
                    bit_plane,
                    missing,
                    self.config.string_count(),
                    sd_ratio,
                    z_score
                );
                PlaneScore {
                    bit_plane,
                    missing,
                    sd_ratio,
                    z_score,
                }
            })
            .collect();
        drop(tally);
        self.phase = Phase::Done(GorillaReport {
            config: self.config,
            planes,
        });
    }
}

impl Drop for GorillaRun {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

fn store_chunk(
    (lane, test_rng, chunk): Chunk,
    chunks: &mut [Option<Vec<u16>>],
    lanes: &mut [Option<Generator>],
) {
    chunks[lane] = Some(chunk);
    lanes[lane] = Some(test_rng);
}
