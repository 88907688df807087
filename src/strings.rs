// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! User interaction strings are stored here.

pub const FAIL_STR: &str = "FAILED!!";
pub const MARGINAL_STR: &str = "MARGINAL!";
pub const PASS_STR: &str = "PASSED";

/// Indexed by `TestMode as usize`.
pub const TEST_NAMES: [&str; 3] = ["Fill", "Collision", "Gorilla"];

pub const OVER_STR: &str = "over";
pub const UNDER_STR: &str = "under";
pub const EXACT_STR: &str = "EXACT?";
