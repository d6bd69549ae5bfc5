//! Triads: windows of three consecutive primes around a depth prime.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::primes::{is_prime, PrimeTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triad(pub [u32; 3]);

impl Triad {
    pub fn new(p0: u32, p1: u32, p2: u32) -> Self {
        Self([p0, p1, p2])
    }

    pub fn primes(&self) -> [u32; 3] {
        self.0
    }

    pub fn product(&self) -> f64 {
        self.0.iter().map(|&p| p as f64).product()
    }

    /// log base 3 of the triad product.
    pub fn tau(&self) -> f64 {
        self.product().ln() / 3f64.ln()
    }

    pub fn label(&self) -> String {
        format!("{}-{}-{}", self.0[0], self.0[1], self.0[2])
    }
}

/// Check that `depth_prime` is prime and present in `table`, returning its index.
pub fn locate_depth(depth_prime: u32, table: &PrimeTable) -> Result<usize> {
    if !is_prime(depth_prime) {
        return Err(DomainError::NotPrime(depth_prime).into());
    }
    table
        .index_of(depth_prime)
        .ok_or_else(|| DomainError::NotInTable(depth_prime).into())
}

/// Produce `count` triads from a window of offsets centred on the depth prime.
///
/// Offsets run `-count/2 ..= count/2`; for even counts the last offset is
/// dropped so exactly `count` triads come back. Start indices clamp to
/// `[0, len-3]`, so triads at the table edges can repeat.
pub fn generate(depth_prime: u32, count: usize, table: &PrimeTable) -> Result<Vec<Triad>> {
    let idx = locate_depth(depth_prime, table)?;
    if count == 0 {
        return Err(DomainError::ZeroProjectionCount.into());
    }
    let primes = table.as_slice();
    if primes.len() < 3 {
        return Err(DomainError::NotInTable(depth_prime).into());
    }
    let max_start = (primes.len() - 3) as i64;
    let half = (count / 2) as i64;

    let triads = (-half..=half)
        .take(count)
        .map(|offset| {
            let i = (idx as i64 + offset).clamp(0, max_start) as usize;
            Triad::new(primes[i], primes[i + 1], primes[i + 2])
        })
        .collect();
    Ok(triads)
}
