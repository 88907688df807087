// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Implementation of the generators under test.
//! Every generator produces 16-bit outputs: the low 16 bits of the
//! post-update state (or of the output word for multi-word states).
//! All arithmetic wraps modulo the state width.

use std::{fmt, str::FromStr};

use rand::{RngCore, SeedableRng};

use crate::error::BenchError;

/// General trait for 16-bit output PRNGs.
pub trait Rng16 {
    /// Generate a 16-bit value and advance the state one step.
    fn next(&mut self) -> u16;
    /// Advance the generator state by the specified amount of steps.
    fn advance(&mut self, delta: usize) {
        for _ in 0..delta {
            let _ = self.next();
        }
    }
}

/// Generators constructible from an integer seed.
pub trait Seeded: Rng16 + Sized {
    /// Initialize with specified seed.
    fn new(seed: u64) -> Self;
    /// Reset to inital state, equivalent to replacing with ::new(seed).
    fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }
}

/// High bits forced into every single word seed so the state is never zero.
const SEED_HIGH_MASK: u32 = 0xffff0000;

fn nonzero_seed(seed: u64) -> u32 {
    SEED_HIGH_MASK | (seed as u32 & 0xffff)
}

/// Wraps the rand crates StdRng as a quality baseline.
/// Bit-reproduction of any particular platform generator is not a goal here.
#[derive(Debug, Clone)]
pub struct ReferenceRand {
    rng: rand::rngs::StdRng,
}

impl Seeded for ReferenceRand {
    fn new(seed: u64) -> Self {
        ReferenceRand {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }
}

impl Rng16 for ReferenceRand {
    fn next(&mut self) -> u16 {
        self.rng.next_u32() as u16
    }
}

// Xorshift PRNGs
pub mod xorshift {
    use super::{nonzero_seed, Rng16, Seeded};

    #[derive(Debug, Copy, Clone)]
    pub struct XorShift32 {
        state: u32,
    }

    impl Seeded for XorShift32 {
        fn new(seed: u64) -> Self {
            XorShift32 {
                state: nonzero_seed(seed),
            }
        }
    }

    impl Rng16 for XorShift32 {
        fn next(&mut self) -> u16 {
            self.state ^= self.state << 13;
            self.state ^= self.state >> 17;
            self.state ^= self.state << 5;
            self.state as u16
        }
    }

    impl XorShift32 {
        pub fn state(&self) -> u32 {
            self.state
        }
    }

    /// Numerical Recipes shift triple.
    /// The seed is the same 32-bit pattern as XorShift32, the upper word starts empty.
    #[derive(Debug, Copy, Clone)]
    pub struct XorShift64 {
        state: u64,
    }

    impl Seeded for XorShift64 {
        fn new(seed: u64) -> Self {
            XorShift64 {
                state: nonzero_seed(seed) as u64,
            }
        }
    }

    impl Rng16 for XorShift64 {
        fn next(&mut self) -> u16 {
            self.state ^= self.state << 21;
            self.state ^= self.state >> 35;
            self.state ^= self.state << 4;
            self.state as u16
        }
    }

    impl XorShift64 {
        pub fn state(&self) -> u64 {
            self.state
        }
    }

    /// Classic four word xorshift, state is [x, y, z, w].
    #[derive(Debug, Copy, Clone)]
    pub struct XorShift128 {
        state: [u32; 4],
    }

    impl Seeded for XorShift128 {
        fn new(seed: u64) -> Self {
            XorShift128 {
                state: [nonzero_seed(seed), 0, 0, 0],
            }
        }
    }

    impl Rng16 for XorShift128 {
        fn next(&mut self) -> u16 {
            let mut t: u32 = self.state[3];
            t ^= t << 11;
            t ^= t >> 8;
            let s: u32 = self.state[0];
            self.state[3] = self.state[2];
            self.state[2] = self.state[1];
            self.state[1] = s;
            self.state[0] = t ^ s ^ (s >> 19);
            self.state[0] as u16
        }
    }

    impl XorShift128 {
        pub fn state(&self) -> [u32; 4] {
            self.state
        }
    }
}

// Multiply with carry PRNGs, multipliers from Numerical Recipes.
pub mod mwc {
    use super::{nonzero_seed, Rng16, Seeded};

    #[derive(Debug, Copy, Clone)]
    pub struct Mwc32 {
        state: u32,
    }

    impl Seeded for Mwc32 {
        fn new(seed: u64) -> Self {
            Mwc32 {
                state: nonzero_seed(seed),
            }
        }
    }

    impl Rng16 for Mwc32 {
        fn next(&mut self) -> u16 {
            self.state = (self.state & 0xffff)
                .wrapping_mul(62904)
                .wrapping_add(self.state >> 16);
            self.state as u16
        }
    }

    #[derive(Debug, Copy, Clone)]
    pub struct Mwc64 {
        state: u64,
    }

    impl Seeded for Mwc64 {
        fn new(seed: u64) -> Self {
            Mwc64 {
                state: nonzero_seed(seed) as u64,
            }
        }
    }

    impl Rng16 for Mwc64 {
        fn next(&mut self) -> u16 {
            self.state = (self.state & 0xffffffff)
                .wrapping_mul(4294957665)
                .wrapping_add(self.state >> 32);
            self.state as u16
        }
    }
}

// Linear congruential generators
pub mod lcg {
    use super::{Rng16, Seeded};

    /// Ill concieved early LCG, that fails the spectral test badly.
    /// Only has output space of 0-2**31-1.
    /// The seed is forced odd, even states lose their low bits over time.
    #[derive(Debug, Copy, Clone)]
    pub struct Randu {
        state: u32,
    }

    impl Seeded for Randu {
        fn new(seed: u64) -> Self {
            Randu {
                state: 0x7ff80001 | ((seed as u32 & 0xffff) << 1),
            }
        }
    }

    impl Rng16 for Randu {
        fn next(&mut self) -> u16 {
            self.state = self.state.wrapping_mul(65539) & 0x7fffffff;
            self.state as u16
        }
    }

    /// Full period 32-bit LCG with the Numerical Recipes constants.
    #[derive(Debug, Copy, Clone)]
    pub struct PopularLcg {
        state: u32,
    }

    impl Seeded for PopularLcg {
        fn new(seed: u64) -> Self {
            PopularLcg { state: seed as u32 }
        }
    }

    impl Rng16 for PopularLcg {
        fn next(&mut self) -> u16 {
            self.state = self.state.wrapping_mul(1664525).wrapping_add(1013904223);
            self.state as u16
        }
    }
}

/// The closed set of generator algorithms.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    XorShift32,
    XorShift64,
    XorShift128,
    Mwc32,
    Mwc64,
    Standard,
    BadLcg,
    PopularLcg,
}

impl GeneratorKind {
    pub const ALL: [GeneratorKind; 8] = [
        GeneratorKind::XorShift32,
        GeneratorKind::XorShift64,
        GeneratorKind::XorShift128,
        GeneratorKind::Mwc32,
        GeneratorKind::Mwc64,
        GeneratorKind::Standard,
        GeneratorKind::BadLcg,
        GeneratorKind::PopularLcg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GeneratorKind::XorShift32 => "XorShift32",
            GeneratorKind::XorShift64 => "XorShift64",
            GeneratorKind::XorShift128 => "XorShift128",
            GeneratorKind::Mwc32 => "Mwc32",
            GeneratorKind::Mwc64 => "Mwc64",
            GeneratorKind::Standard => "Standard",
            GeneratorKind::BadLcg => "BadLcg",
            GeneratorKind::PopularLcg => "PopularLcg",
        }
    }

    /// Next generator in the selection cycle.
    pub fn cycle(self) -> GeneratorKind {
        match self {
            GeneratorKind::XorShift32 => GeneratorKind::Mwc32,
            GeneratorKind::Mwc32 => GeneratorKind::Mwc64,
            GeneratorKind::Mwc64 => GeneratorKind::Standard,
            GeneratorKind::Standard => GeneratorKind::BadLcg,
            GeneratorKind::BadLcg => GeneratorKind::PopularLcg,
            GeneratorKind::PopularLcg => GeneratorKind::XorShift128,
            GeneratorKind::XorShift128 => GeneratorKind::XorShift64,
            GeneratorKind::XorShift64 => GeneratorKind::XorShift32,
        }
    }
}

impl Default for GeneratorKind {
    fn default() -> Self {
        GeneratorKind::XorShift32
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GeneratorKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GeneratorKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| BenchError::UnknownGenerator(s.to_owned()))
    }
}

/// A generator instance of any of the supported algorithms.
/// The algorithm is fixed for the lifetime of the instance.
#[derive(Debug, Clone)]
pub enum Generator {
    XorShift32(xorshift::XorShift32),
    XorShift64(xorshift::XorShift64),
    XorShift128(xorshift::XorShift128),
    Mwc32(mwc::Mwc32),
    Mwc64(mwc::Mwc64),
    Standard(ReferenceRand),
    BadLcg(lcg::Randu),
    PopularLcg(lcg::PopularLcg),
}

impl Generator {
    pub fn new(kind: GeneratorKind, seed: u64) -> Self {
        match kind {
            GeneratorKind::XorShift32 => Generator::XorShift32(xorshift::XorShift32::new(seed)),
            GeneratorKind::XorShift64 => Generator::XorShift64(xorshift::XorShift64::new(seed)),
            GeneratorKind::XorShift128 => Generator::XorShift128(xorshift::XorShift128::new(seed)),
            GeneratorKind::Mwc32 => Generator::Mwc32(mwc::Mwc32::new(seed)),
            GeneratorKind::Mwc64 => Generator::Mwc64(mwc::Mwc64::new(seed)),
            GeneratorKind::Standard => Generator::Standard(ReferenceRand::new(seed)),
            GeneratorKind::BadLcg => Generator::BadLcg(lcg::Randu::new(seed)),
            GeneratorKind::PopularLcg => Generator::PopularLcg(lcg::PopularLcg::new(seed)),
        }
    }

    /// One generator per lane, lane `i` seeded with `i`.
    pub fn lanes(kind: GeneratorKind, count: usize) -> Vec<Generator> {
        (0..count).map(|lane| Generator::new(kind, lane as u64)).collect()
    }

    pub fn kind(&self) -> GeneratorKind {
        match self {
            Generator::XorShift32(_) => GeneratorKind::XorShift32,
            Generator::XorShift64(_) => GeneratorKind::XorShift64,
            Generator::XorShift128(_) => GeneratorKind::XorShift128,
            Generator::Mwc32(_) => GeneratorKind::Mwc32,
            Generator::Mwc64(_) => GeneratorKind::Mwc64,
            Generator::Standard(_) => GeneratorKind::Standard,
            Generator::BadLcg(_) => GeneratorKind::BadLcg,
            Generator::PopularLcg(_) => GeneratorKind::PopularLcg,
        }
    }
}

impl Rng16 for Generator {
    #[inline]
    fn next(&mut self) -> u16 {
        match self {
            Generator::XorShift32(r) => r.next(),
            Generator::XorShift64(r) => r.next(),
            Generator::XorShift128(r) => r.next(),
            Generator::Mwc32(r) => r.next(),
            Generator::Mwc64(r) => r.next(),
            Generator::Standard(r) => r.next(),
            Generator::BadLcg(r) => r.next(),
            Generator::PopularLcg(r) => r.next(),
        }
    }
}

/// Degenerate generators with known output, for checking the tests themselves.
#[cfg(test)]
pub mod testgens {
    use super::Rng16;

    /// Produces 0, 1, 0, 1, ...
    pub struct AlternatingBits {
        state: u16,
    }
    impl AlternatingBits {
        pub fn new() -> Self {
            AlternatingBits { state: 1 }
        }
    }
    impl Rng16 for AlternatingBits {
        fn next(&mut self) -> u16 {
            self.state ^= 1;
            self.state
        }
    }

    pub struct OnlyZero {}
    impl Rng16 for OnlyZero {
        fn next(&mut self) -> u16 {
            0
        }
    }

    /// Counts upwards through the whole output space.
    pub struct Counter {
        state: u16,
    }
    impl Counter {
        pub fn new() -> Self {
            Counter { state: 0 }
        }
    }
    impl Rng16 for Counter {
        fn next(&mut self) -> u16 {
            let value = self.state;
            self.state = self.state.wrapping_add(1);
            value
        }
    }
}
