// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Headless statistical testing of the generators and speed measurement.

use std::time::{Duration, Instant};

use tracing::info;

use crate::{
    collision::{CollisionCell, Dispersion},
    error::Result,
    gorilla::GorillaReport,
    orchestrator::{Bench, TestMode},
    rngs::{Generator, GeneratorKind, Rng16},
    stats::{self, Verdict},
    strings, utils,
};

#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    /// z score of the test statistic.
    pub z: f64,
    /// Normal CDF of `z`.
    pub p: f64,
    pub time_used: Duration,
}

impl TestResult {
    fn new(name: String, z: f64, time_used: Duration) -> Self {
        TestResult {
            name,
            z,
            p: stats::normal_cdf(z),
            time_used,
        }
    }

    pub fn logstat(&self) -> f64 {
        stats::p_log_stat(self.p)
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_p(self.p)
    }

    pub fn passed(&self) -> bool {
        self.verdict() != Verdict::Fail
    }

    pub fn format(&self) -> String {
        format!(
            "{:<24}: Time: {}     z: {:>10.3}     p: {:.6}     pls: {:.4}   - {}",
            self.name,
            utils::format_elapsed_time(self.time_used),
            self.z,
            self.p,
            self.logstat(),
            verdict_str(self.verdict())
        )
    }
}

pub fn verdict_str(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => strings::PASS_STR,
        Verdict::Marginal => strings::MARGINAL_STR,
        Verdict::Fail => strings::FAIL_STR,
    }
}

pub fn dispersion_str(dispersion: Dispersion) -> &'static str {
    match dispersion {
        Dispersion::Over => strings::OVER_STR,
        Dispersion::Under => strings::UNDER_STR,
        Dispersion::Exact => strings::EXACT_STR,
    }
}

/// One line per collision cell.
pub fn format_collision_cell(cell: &CollisionCell, diff_scale: f64) -> String {
    format!(
        "{:>2} x {:>5} bins  plane {:>2}: ratio {:.6}  scaled {:>+9.4}  z {:>+9.3}  {}",
        cell.layout.bit_planes,
        cell.layout.bins,
        cell.bit_plane,
        cell.ratio,
        cell.scaled_deviation(diff_scale),
        cell.z_score,
        dispersion_str(cell.dispersion)
    )
}

/// One line per gorilla bit plane.
pub fn format_gorilla_report(report: &GorillaReport) -> Vec<String> {
    report
        .planes
        .iter()
        .map(|plane| {
            format!(
                "plane {:>2}: missing {:>9}/{}  sd {:>+9.3}  z {:>+8.3}  - {}",
                plane.bit_plane,
                plane.missing,
                report.config.string_count(),
                plane.sd_ratio,
                plane.z_score,
                verdict_str(Verdict::from_p(stats::normal_cdf(plane.z_score)))
            )
        })
        .collect()
}

/// Summary of a list of `TestResult`s with a histogram of the p log stats.
pub fn format_test_results_summary(test_results: &[TestResult]) -> String {
    const P_LOG_STAT_BINS: usize = 10;
    let mut p_logstat_bins = [0u32; P_LOG_STAT_BINS];
    let mut passed_tests = 0usize;
    for rslt in test_results {
        let bin = (rslt.logstat().floor() as usize).min(P_LOG_STAT_BINS - 1);
        p_logstat_bins[bin] += 1;
        if rslt.passed() {
            passed_tests += 1;
        }
    }
    let logstat_summary: String = p_logstat_bins
        .iter()
        .enumerate()
        .map(|(bin, &value)| {
            if bin == P_LOG_STAT_BINS - 1 {
                format!("{:>2}+ : {:04}", bin, value)
            } else {
                format!("{:>2} : {:04}|", bin, value)
            }
        })
        .collect::<Vec<String>>()
        .join("");
    format!(
        "P log stats: \n{}\nOverall result: {}          ( {} / {} passed)",
        logstat_summary,
        if passed_tests == test_results.len() {
            strings::PASS_STR
        } else {
            strings::FAIL_STR
        },
        passed_tests,
        test_results.len()
    )
}

/// Run `frames` collision frames and one gorilla run for the selected generator.
pub fn test_generator(
    bench: &mut Bench,
    kind: GeneratorKind,
    frames: usize,
    result_file_path: &str,
) -> Result<Vec<TestResult>> {
    let mut test_results = vec![];
    // Mode first, switching the generator in gorilla mode would start a run.
    bench.set_test_mode(TestMode::Collision)?;
    bench.set_generator(kind)?;
    let start = Instant::now();
    for _ in 0..frames {
        bench.step()?;
    }
    let per_cell = start.elapsed() / 31;
    for cell in bench.collision_report() {
        let rslt = TestResult::new(
            format!(
                "Collision {}x{} p{}",
                cell.layout.bit_planes, cell.layout.bins, cell.bit_plane
            ),
            cell.z_score,
            per_cell,
        );
        utils::write_and_print(rslt.format(), result_file_path);
        test_results.push(rslt);
    }

    let start = Instant::now();
    bench.set_test_mode(TestMode::Gorilla)?;
    let report = bench.wait_gorilla()?.clone();
    let per_plane = start.elapsed() / report.planes.len().max(1) as u32;
    for plane in report.planes.iter() {
        let rslt = TestResult::new(
            format!("Gorilla p{}", plane.bit_plane),
            plane.z_score,
            per_plane,
        );
        utils::write_and_print(rslt.format(), result_file_path);
        test_results.push(rslt);
    }
    Ok(test_results)
}

/// Test every listed generator and write a summary for each.
pub fn test_suite(
    bench: &mut Bench,
    kinds: &[GeneratorKind],
    frames: usize,
    result_file_path: &str,
) -> Result<()> {
    let full_start = Instant::now();
    utils::write_and_print(
        format!(
            "\nTest run {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
        result_file_path,
    );
    for &kind in kinds {
        let start = Instant::now();
        utils::write_and_print(format!("\nTesting: {}", kind), result_file_path);
        let test_results = test_generator(bench, kind, frames, result_file_path)?;
        utils::write_and_print(format!("\nSummary for: {}", kind), result_file_path);
        utils::write_and_print(
            format_test_results_summary(&test_results),
            result_file_path,
        );
        info!("{} tested in {:?}", kind, start.elapsed());
    }
    utils::write_and_print(
        format!("Total runtime: {:?}", full_start.elapsed()),
        result_file_path,
    );
    Ok(())
}

/// Time `calls` outputs of a lane 0 generator.
pub fn measure_speed(kind: GeneratorKind, calls: usize) -> Duration {
    let mut test_rng = Generator::new(kind, 0);
    let start = Instant::now();
    // Summed so the calls are not optimized away.
    let mut sum: u64 = 0;
    for _ in 0..calls {
        sum = sum.wrapping_add(test_rng.next() as u64);
    }
    let elapsed = start.elapsed();
    std::hint::black_box(sum);
    elapsed
}

/// Speed of `kind` in bytes per second and relative to the rand crate reference.
pub fn speed_test(kind: GeneratorKind, calls: usize, reference: Duration) -> String {
    let elapsed = measure_speed(kind, calls);
    let bytes = calls * 2;
    let speed = bytes as f64 / elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
    let rel_speed =
        reference.as_secs_f64() / elapsed.as_secs_f64().max(f64::MIN_POSITIVE) * 100.0;
    format!(
        "{:<12} {} calls in {} (Speed: {}/s  ({:.2}% of Standard))",
        kind.name(),
        calls,
        utils::format_elapsed_time(elapsed),
        utils::format_byte_count(speed as usize),
        rel_speed
    )
}

/// Benchmark every generator against the Standard reference.
pub fn benchmark(calls: usize) -> Vec<String> {
    let reference = measure_speed(GeneratorKind::Standard, calls);
    GeneratorKind::ALL
        .into_iter()
        .map(|kind| speed_test(kind, calls, reference))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collision::BinLayout, config::BenchConfig, gorilla::GorillaConfig};

    fn result(p_z: f64) -> TestResult {
        TestResult::new("t".to_owned(), p_z, Duration::ZERO)
    }

    #[test]
    fn verdict_from_z() {
        assert!(result(0.0).passed());
        assert_eq!(result(0.0).verdict(), Verdict::Pass);
        assert_eq!(result(50.0).verdict(), Verdict::Fail);
        assert!(result(0.5).format().ends_with(strings::PASS_STR));
    }

    #[test]
    fn summary_counts() {
        let results = vec![result(0.1), result(-0.3), result(40.0)];
        let summary = format_test_results_summary(&results);
        assert!(summary.contains("( 2 / 3 passed)"));
        assert!(summary.contains(strings::FAIL_STR));
        assert!(summary.contains(" 9+ : 0001"));
        let summary = format_test_results_summary(&results[..2]);
        assert!(summary.contains(strings::PASS_STR));
    }

    #[test]
    fn collision_line() {
        let cell = CollisionCell {
            layout: BinLayout::ALL[4],
            bit_plane: 3,
            ratio: 1.0,
            z_score: 0.0,
            dispersion: Dispersion::Exact,
        };
        let line = format_collision_cell(&cell, 100.0);
        assert!(line.contains("plane  3"));
        assert!(line.ends_with(strings::EXACT_STR));
    }

    #[test]
    fn gorilla_lines() {
        let config = GorillaConfig::new(12).unwrap();
        let report = GorillaReport {
            config,
            planes: vec![crate::gorilla::PlaneScore {
                bit_plane: 0,
                missing: config.ideal_mean() + 130,
                sd_ratio: config.sd_ratio(config.ideal_mean() + 130),
                z_score: config.z_score(config.ideal_mean() + 130),
            }],
        };
        let lines = format_gorilla_report(&report);
        assert_eq!(lines.len(), 1);
        // 130 display units but only two expected deviations at L = 14
        assert!(lines[0].contains("sd  +130.000"));
        assert!(lines[0].ends_with(strings::PASS_STR));
    }

    #[test]
    fn randu_fails_the_suite() {
        let config = BenchConfig {
            width: 64,
            height: 32,
            gorilla_shortening: 12,
            ..Default::default()
        };
        let mut bench = Bench::new(config).unwrap();
        let path = std::env::temp_dir()
            .join(format!("pearlacid-bench-suite-{}", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let results = test_generator(&mut bench, GeneratorKind::BadLcg, 1, &path).unwrap();
        assert_eq!(results.len(), 31 + 16);
        // the low bit of RANDU is constant
        let named = |name: &str| results.iter().find(|r| r.name == name).unwrap();
        assert!(!named("Collision 16x2 p0").passed());
        assert!(!named("Gorilla p0").passed());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reference_generator_passes_shortened_gorilla() {
        let config = BenchConfig {
            width: 64,
            height: 32,
            gorilla_shortening: 12,
            ..Default::default()
        };
        let mut bench = Bench::new(config).unwrap();
        let path = std::env::temp_dir()
            .join(format!("pearlacid-bench-standard-{}", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let results = test_generator(&mut bench, GeneratorKind::Standard, 1, &path).unwrap();
        let gorilla_failures = results
            .iter()
            .filter(|r| r.name.starts_with("Gorilla") && !r.passed())
            .count();
        assert!(gorilla_failures <= 1, "{} gorilla planes failed", gorilla_failures);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn benchmark_lists_every_generator() {
        let lines = benchmark(1000);
        assert_eq!(lines.len(), 8);
        assert!(lines[0].starts_with("XorShift32"));
    }
}
