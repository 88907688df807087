// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Closed form expectations and scoring helpers for the tests.

use std::ops::Mul;

use crate::utils;

/// pls above this fails.
pub const P_LOG_STAT_LIMIT: f64 = 3.0;
/// pls above this is marginal.
pub const P_LOG_STAT_MARGINAL: f64 = 2.0;

/// Probability that a given bin is hit at least once
/// when `bin_count` uniform samples are thrown into `bin_count` bins.
/// 1 - ((n - 1) / n)^n, tends to 1 - 1/e.
pub fn collision_ideal(bin_count: usize) -> f64 {
    let n = bin_count as f64;
    1.0 - ((n - 1.0) / n).powf(n)
}

/// Variance of the number of occupied bins after throwing
/// `bin_count` samples into `bin_count` bins.
pub fn occupancy_variance(bin_count: usize) -> f64 {
    let n = bin_count as f64;
    let empty_one = ((n - 1.0) / n).powf(n);
    let empty_two = ((n - 2.0) / n).powf(n);
    n * empty_one + n * (n - 1.0) * empty_two - n * n * empty_one * empty_one
}

/// Number of standard deviations `observed` lies away from `mean`.
pub fn sd_ratio(observed: f64, mean: f64, stdev: f64) -> f64 {
    (observed - mean) / stdev
}

/// Standard normal CDF of a z score.
/// Both tails map close to 0.0 or 1.0, which is what `p_log_stat` measures.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-z * utils::INV_ROOT2)
}

/// Logarithmic quantity to specify how close to 1.0 or 0.0 a p-value is.
/// Has a range of 0-9.9999.
/// -0.2 * (log2(min(p, 1-p)) - 1) clamped to 9.9999
pub fn p_log_stat(p: f64) -> f64 {
    (p.min(1.0 - p).log2() - 1.0).mul(-0.2).min(9.9999)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Marginal,
    Fail,
}

impl Verdict {
    pub fn from_p(p: f64) -> Verdict {
        let pls = p_log_stat(p);
        if pls.is_nan() || pls >= P_LOG_STAT_LIMIT {
            Verdict::Fail
        } else if pls >= P_LOG_STAT_MARGINAL {
            Verdict::Marginal
        } else {
            Verdict::Pass
        }
    }
}
