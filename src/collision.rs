// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Birthday style collision test.
//!
//! The 16 output bits are split into `bit_planes` windows of
//! `16 / bit_planes` bits each, every window selecting one of `bins` bins.
//! A trial throws `bins` samples and counts the occupied bins per window,
//! which is compared against 1 - ((n - 1) / n)^n.

use tracing::debug;

use crate::{
    rngs::Rng16,
    stats::{self, collision_ideal},
};

/// Partition of the 16-bit output space into bit planes and bins.
/// `bit_planes * log2(bins)` is always 16.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BinLayout {
    pub bit_planes: usize,
    pub bins: usize,
}

impl BinLayout {
    pub const ALL: [BinLayout; 5] = [
        BinLayout { bit_planes: 1, bins: 1 << 16 },
        BinLayout { bit_planes: 2, bins: 1 << 8 },
        BinLayout { bit_planes: 4, bins: 1 << 4 },
        BinLayout { bit_planes: 8, bins: 1 << 2 },
        BinLayout { bit_planes: 16, bins: 1 << 1 },
    ];

    /// Width of the bit window selecting a bin.
    pub fn shift(&self) -> u32 {
        16 / self.bit_planes as u32
    }

    pub fn mask(&self) -> u32 {
        (1u32 << self.shift()) - 1
    }

    /// Trials per frame, every layout consumes 65536 / bit_planes samples per frame.
    pub fn max_iterations(&self) -> usize {
        (1 << 16) / self.bins / self.bit_planes
    }

    pub fn ideal(&self) -> f64 {
        collision_ideal(self.bins)
    }
}

/// How a ratio relates to the ideal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dispersion {
    /// More bins hit than expected.
    Over,
    /// More collisions than expected.
    Under,
    /// Exactly the ideal in f64, which is suspicious rather than perfect.
    Exact,
}

impl Dispersion {
    pub fn of(ratio: f64) -> Dispersion {
        if ratio > 1.0 {
            Dispersion::Over
        } else if ratio < 1.0 {
            Dispersion::Under
        } else {
            Dispersion::Exact
        }
    }
}

/// Result for one (layout, bit plane) cell.
#[derive(Debug, Copy, Clone)]
pub struct CollisionCell {
    pub layout: BinLayout,
    pub bit_plane: usize,
    /// Average occupied fraction divided by the ideal.
    pub ratio: f64,
    /// Normal approximation of the total occupied count over all trials.
    pub z_score: f64,
    pub dispersion: Dispersion,
}

impl CollisionCell {
    /// Signed deviation scaled for display, 0 at the ideal.
    pub fn scaled_deviation(&self, diff_scale: f64) -> f64 {
        (self.ratio - 1.0) * diff_scale
    }
}

struct LayoutState {
    layout: BinLayout,
    /// bit_planes x bins, row major.
    occupancy: Vec<bool>,
    /// Occupied bins per bit plane, summed over all trials.
    totals: Vec<f64>,
}

impl LayoutState {
    fn new(layout: BinLayout) -> Self {
        LayoutState {
            layout,
            occupancy: vec![false; layout.bit_planes * layout.bins],
            totals: vec![0.0; layout.bit_planes],
        }
    }

    fn run(&mut self, test_rng: &mut impl Rng16) {
        let BinLayout { bit_planes, bins } = self.layout;
        let shift = self.layout.shift();
        let mask = self.layout.mask();
        for _ in 0..self.layout.max_iterations() {
            self.occupancy.fill(false);
            for _ in 0..bins {
                let sample = test_rng.next() as u32;
                for plane in 0..bit_planes {
                    let bin = (sample >> (plane as u32 * shift)) & mask;
                    self.occupancy[plane * bins + bin as usize] = true;
                }
            }
            for (plane, row) in self.occupancy.chunks_exact(bins).enumerate() {
                self.totals[plane] += row.iter().filter(|&&hit| hit).count() as f64;
            }
        }
    }
}

pub struct CollisionTest {
    layouts: Vec<LayoutState>,
    frame_count: u64,
}

impl Default for CollisionTest {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionTest {
    pub fn new() -> Self {
        CollisionTest {
            layouts: BinLayout::ALL.into_iter().map(LayoutState::new).collect(),
            frame_count: 0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Forget all accumulated counts.
    pub fn reset(&mut self) {
        for state in self.layouts.iter_mut() {
            state.occupancy.fill(false);
            state.totals.fill(0.0);
        }
        self.frame_count = 0;
    }

    /// Run every trial of every layout once, drawing all samples from `test_rng`.
    pub fn run_frame(&mut self, test_rng: &mut impl Rng16) {
        self.frame_count += 1;
        for state in self.layouts.iter_mut() {
            state.run(test_rng);
        }
        debug!("Collision frame {} done", self.frame_count);
    }

    /// Statistics of one cell, None before the first frame.
    pub fn cell(&self, layout_index: usize, bit_plane: usize) -> Option<CollisionCell> {
        if self.frame_count == 0 {
            return None;
        }
        let state = self.layouts.get(layout_index)?;
        let layout = state.layout;
        let total = *state.totals.get(bit_plane)?;
        let trials = self.frame_count as f64 * layout.max_iterations() as f64;
        let bins = layout.bins as f64;
        let average = total / self.frame_count as f64 / layout.max_iterations() as f64 / bins;
        let ideal = layout.ideal();
        let ratio = average / ideal;
        let z_score = stats::sd_ratio(
            total,
            trials * bins * ideal,
            (trials * stats::occupancy_variance(layout.bins)).sqrt(),
        );
        Some(CollisionCell {
            layout,
            bit_plane,
            ratio,
            z_score,
            dispersion: Dispersion::of(ratio),
        })
    }

    /// All cells, layout by layout. Empty before the first frame.
    pub fn report(&self) -> Vec<CollisionCell> {
        BinLayout::ALL
            .iter()
            .enumerate()
            .flat_map(|(index, layout)| (0..layout.bit_planes).map(move |plane| (index, plane)))
            .filter_map(|(index, plane)| self.cell(index, plane))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rngs::{testgens, Generator, GeneratorKind};

    const TWO_BIN_LAYOUT: usize = 4;

    #[test]
    fn layouts_cover_sixteen_bits() {
        for layout in BinLayout::ALL {
            assert_eq!(layout.bit_planes as u32 * layout.bins.trailing_zeros(), 16);
            assert_eq!(1usize << layout.shift(), layout.bins);
            assert_eq!(
                layout.max_iterations() * layout.bins * layout.bit_planes,
                1 << 16
            );
            let closed_form = 1.0 - (1.0 - 1.0 / layout.bins as f64).powi(layout.bins as i32);
            assert!((layout.ideal() - closed_form).abs() < 1e-12);
        }
    }

    #[test]
    fn no_cells_before_first_frame() {
        let test = CollisionTest::new();
        assert!(test.cell(0, 0).is_none());
        assert!(test.report().is_empty());
    }

    #[test]
    fn alternating_bits_two_bins() {
        // Every layout draws an even number of samples per frame, so the
        // two-bin trials always see 0 then 1. Plane 0 hits both bins,
        // every other plane only bin 0.
        let mut test = CollisionTest::new();
        let mut r = testgens::AlternatingBits::new();
        test.run_frame(&mut r);
        let low = test.cell(TWO_BIN_LAYOUT, 0).unwrap();
        assert!((low.ratio - 1.0 / 0.75).abs() < 1e-12);
        assert_eq!(low.dispersion, Dispersion::Over);
        for plane in 1..16 {
            let cell = test.cell(TWO_BIN_LAYOUT, plane).unwrap();
            assert!((cell.ratio - 0.5 / 0.75).abs() < 1e-12);
            assert_eq!(cell.dispersion, Dispersion::Under);
            assert!(cell.z_score < -10.0);
        }
    }

    #[test]
    fn running_average_is_stable_over_frames() {
        let mut test = CollisionTest::new();
        let mut r = testgens::AlternatingBits::new();
        for _ in 0..3 {
            test.run_frame(&mut r);
        }
        assert_eq!(test.frame_count(), 3);
        let low = test.cell(TWO_BIN_LAYOUT, 0).unwrap();
        assert!((low.ratio - 1.0 / 0.75).abs() < 1e-12);
    }

    #[test]
    fn counter_fills_every_bin() {
        let mut test = CollisionTest::new();
        test.run_frame(&mut testgens::Counter::new());
        let full = test.cell(0, 0).unwrap();
        assert!((full.ratio - 1.0 / BinLayout::ALL[0].ideal()).abs() < 1e-12);
        assert_eq!(full.dispersion, Dispersion::Over);
    }

    #[test]
    fn constant_output_is_under_dispersed() {
        let mut test = CollisionTest::new();
        test.run_frame(&mut testgens::OnlyZero {});
        for cell in test.report() {
            assert_eq!(cell.dispersion, Dispersion::Under);
            let expected = 1.0 / cell.layout.bins as f64 / cell.layout.ideal();
            assert!((cell.ratio - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn randu_low_bit_is_constant() {
        let mut test = CollisionTest::new();
        let mut r = Generator::new(GeneratorKind::BadLcg, 0);
        test.run_frame(&mut r);
        let low = test.cell(TWO_BIN_LAYOUT, 0).unwrap();
        assert!((low.ratio - 0.5 / 0.75).abs() < 1e-12);
    }

    #[test]
    fn reference_generator_close_to_ideal() {
        let mut test = CollisionTest::new();
        let mut r = Generator::new(GeneratorKind::Standard, 0);
        test.run_frame(&mut r);
        let report = test.report();
        assert_eq!(report.len(), 1 + 2 + 4 + 8 + 16);
        for cell in report {
            assert!(
                (cell.ratio - 1.0).abs() < 0.05,
                "{:?} plane {} ratio {}",
                cell.layout,
                cell.bit_plane,
                cell.ratio
            );
        }
    }

    #[test]
    fn reset_clears_counts() {
        let mut test = CollisionTest::new();
        test.run_frame(&mut testgens::OnlyZero {});
        test.reset();
        assert_eq!(test.frame_count(), 0);
        assert!(test.report().is_empty());
        test.run_frame(&mut testgens::Counter::new());
        assert_eq!(test.cell(0, 0).unwrap().dispersion, Dispersion::Over);
    }

    #[test]
    fn exact_ratio_is_flagged() {
        assert_eq!(Dispersion::of(1.0), Dispersion::Exact);
        assert_eq!(Dispersion::of(1.0 + f64::EPSILON), Dispersion::Over);
    }
}
