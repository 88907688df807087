// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Bench configuration.

use std::time::Duration;

use crate::{
    error::{BenchError, Result},
    gorilla::GorillaConfig,
};

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_WIDTH: usize = 512;
pub const DEFAULT_HEIGHT: usize = 256;
pub const DEFAULT_PIXELS_PER_LANE: usize = 100_000;
pub const DEFAULT_DIFF_SCALE: f64 = 100.0;
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Worker threads, also the number of generator lanes.
    pub worker_count: usize,
    /// Fill canvas size in pixels.
    pub width: usize,
    pub height: usize,
    /// Pixels painted by every lane per fill frame.
    pub pixels_per_lane: usize,
    /// Gorilla window length is 26 minus this.
    pub gorilla_shortening: u32,
    /// Collision deviation multiplier for display.
    pub diff_scale: f64,
    /// Deadlock detection bound for every blocking wait.
    pub sync_timeout: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            worker_count: DEFAULT_WORKER_COUNT,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixels_per_lane: DEFAULT_PIXELS_PER_LANE,
            gorilla_shortening: 0,
            diff_scale: DEFAULT_DIFF_SCALE,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(BenchError::config("worker count must be positive"));
        }
        // Coordinates come from 16-bit samples.
        if self.width == 0 || self.width > 1 << 16 {
            return Err(BenchError::config(format!(
                "width {} outside 1..=65536",
                self.width
            )));
        }
        if self.height == 0 || self.height % self.worker_count != 0 {
            return Err(BenchError::config(format!(
                "height {} is not a positive multiple of the worker count {}",
                self.height, self.worker_count
            )));
        }
        if self.band_height() > 1 << 16 {
            return Err(BenchError::config(format!(
                "band height {} exceeds 65536",
                self.band_height()
            )));
        }
        if self.sync_timeout.is_zero() {
            return Err(BenchError::config("sync timeout must be positive"));
        }
        GorillaConfig::new(self.gorilla_shortening)?;
        Ok(())
    }

    /// Rows owned by each lane of the fill canvas.
    pub fn band_height(&self) -> usize {
        self.height / self.worker_count
    }

    pub fn gorilla(&self) -> Result<GorillaConfig> {
        GorillaConfig::new(self.gorilla_shortening)
    }
}
