//! Phase math: pure scalar functions feeding the projection recurrence.
//!
//! Nothing here holds state. Every function is deterministic in its inputs.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::triads::Triad;

pub const BASE_FREQUENCY_HZ: f64 = 432.0;
pub const SECTORS: usize = 12;
pub const PRIME_STOPS: [u32; 10] = [11, 13, 17, 29, 31, 47, 59, 61, 97, 101];

const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

// =============================================================================
// Lambda schedule symbols
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lambda {
    Dub,
    Kubt,
    KAnch,
    Numeric(u32),
}

impl Lambda {
    pub fn nu(&self) -> u32 {
        match self {
            Lambda::Dub => 3,
            Lambda::Kubt => 5,
            Lambda::KAnch => 7,
            Lambda::Numeric(n) => pow3_mod3(*n),
        }
    }

    /// Lenient token parse. Unknown tokens map to `Dub`, which carries the
    /// default nu of 3.
    pub fn from_token(token: &str) -> Self {
        token.parse().unwrap_or(Lambda::Dub)
    }

    pub fn default_schedule() -> Vec<Lambda> {
        vec![Lambda::Dub, Lambda::Kubt, Lambda::KAnch]
    }
}

impl FromStr for Lambda {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dub" => Ok(Lambda::Dub),
            "kubt" => Ok(Lambda::Kubt),
            "k'anch" | "kanch" => Ok(Lambda::KAnch),
            other => other
                .parse::<u32>()
                .map(Lambda::Numeric)
                .map_err(|_| format!("unknown lambda token: {}", s)),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lambda::Dub => write!(f, "dub"),
            Lambda::Kubt => write!(f, "kubt"),
            Lambda::KAnch => write!(f, "k'anch"),
            Lambda::Numeric(n) => write!(f, "{}", n),
        }
    }
}

// 3^n mod 3 without overflowing for large n.
fn pow3_mod3(n: u32) -> u32 {
    if n == 0 {
        1
    } else {
        0
    }
}

// =============================================================================
// Psi
// =============================================================================

/// Plimpton-style ratio (p^2 - q^2) / (p^2 + q^2).
pub fn psi_plimpton(p: f64, q: f64) -> f64 {
    let p2 = p * p;
    let q2 = q * q;
    let denom = p2 + q2;
    if denom == 0.0 {
        0.0
    } else {
        (p2 - q2) / denom
    }
}

fn previous_stop(idx: usize) -> u32 {
    if idx == 0 {
        2
    } else {
        PRIME_STOPS[idx - 1]
    }
}

fn stop_index(p: u32) -> Option<usize> {
    PRIME_STOPS.iter().position(|&s| s == p)
}

pub fn psi_from_depth(depth_prime: u32) -> f64 {
    match stop_index(depth_prime) {
        Some(idx) => psi_plimpton(depth_prime as f64, previous_stop(idx) as f64),
        None => psi_plimpton(depth_prime as f64, depth_prime as f64 - 2.0),
    }
}

/// Gap between a prime and the stop before it; 2 for primes off the list.
fn stop_difference(p: u32) -> f64 {
    match stop_index(p) {
        Some(idx) => (p - previous_stop(idx)) as f64,
        None => 2.0,
    }
}

/// The three shapes psi arrives in when feeding theta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PsiInput {
    Number(f64),
    PrimePair { p: u32, q: u32 },
    None,
}

impl PsiInput {
    fn stop_difference(&self, depth_prime: u32) -> f64 {
        match *self {
            PsiInput::Number(x) => {
                let matched = PRIME_STOPS
                    .iter()
                    .position(|&s| s as f64 == x);
                match matched {
                    Some(idx) => (PRIME_STOPS[idx] - previous_stop(idx)) as f64,
                    None => stop_difference(depth_prime),
                }
            }
            PsiInput::PrimePair { p, q } => p as f64 - q as f64,
            PsiInput::None => stop_difference(depth_prime),
        }
    }
}

// =============================================================================
// Omega gate
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OmegaGate {
    pub phase: f64,
    pub magnitude: f64,
}

/// Octave-equivalent phase and amplitude relative to 432 Hz.
pub fn omega_gate(frequency_hz: f64) -> OmegaGate {
    let ratio = frequency_hz / BASE_FREQUENCY_HZ;
    OmegaGate {
        phase: 2.0 * PI * ratio.log2().rem_euclid(1.0),
        magnitude: ratio.sqrt(),
    }
}

// =============================================================================
// Theta and growth
// =============================================================================

fn log3(x: f64) -> f64 {
    x.ln() / 3f64.ln()
}

pub fn theta_step(i: usize, psi: PsiInput, lambda: Lambda, frequency_hz: f64, depth_prime: u32) -> f64 {
    let golden = i as f64 * (GOLDEN_RATIO - 1.0);
    let sector = (i % SECTORS) as f64 * (2.0 * PI / SECTORS as f64);
    let nu = log3(lambda.nu().max(1) as f64);
    let freq = frequency_hz / BASE_FREQUENCY_HZ;
    let stops = psi.stop_difference(depth_prime) * (PI / 180.0);
    golden + sector + nu + freq + stops
}

pub fn growth_step(previous: f64, theta: f64, _frequency_hz: f64, triad: &Triad) -> f64 {
    previous * 3f64.powf(theta / 100.0) * (1.0 + triad.tau() / 1000.0)
}

/// Truncate toward zero at `decimals` places.
///
/// The scaled product is not rounded first, so a value that lands one ulp
/// under an exact boundary loses its last unit (0.29 at 2 places gives 0.28).
/// Projected prices pinned in `reference_trajectory_is_reproduced` depend on
/// this, so keep it as is.
pub fn truncate(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).trunc() / factor
}
