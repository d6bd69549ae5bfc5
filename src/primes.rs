//! Fixed table of the first 500 primes.

use std::sync::OnceLock;

pub const TABLE_LEN: usize = 500;

// The 500th prime is 3571.
const SIEVE_LIMIT: usize = 3572;

static TABLE: OnceLock<PrimeTable> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeTable {
    primes: Vec<u32>,
}

impl PrimeTable {
    /// Shared process-wide table. Built once, never mutated.
    pub fn global() -> &'static PrimeTable {
        TABLE.get_or_init(|| PrimeTable::with_len(TABLE_LEN))
    }

    /// Table of the first `len` primes. Used for tests with short tables.
    pub fn with_len(len: usize) -> Self {
        let mut limit = SIEVE_LIMIT.max(16);
        loop {
            let primes = sieve(limit);
            if primes.len() >= len {
                return Self { primes: primes.into_iter().take(len).collect() };
            }
            limit *= 2;
        }
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<u32> {
        self.primes.get(idx).copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.primes
    }

    pub fn index_of(&self, p: u32) -> Option<usize> {
        self.primes.binary_search(&p).ok()
    }

    pub fn contains(&self, p: u32) -> bool {
        self.index_of(p).is_some()
    }
}

fn sieve(limit: usize) -> Vec<u32> {
    let mut composite = vec![false; limit + 1];
    let mut out = Vec::new();
    for n in 2..=limit {
        if composite[n] {
            continue;
        }
        out.push(n as u32);
        let mut m = n * n;
        while m <= limit {
            composite[m] = true;
            m += n;
        }
    }
    out
}

/// Trial division, independent of the table.
pub fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let n = n as u64;
    let mut d = 3u64;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_table_bounds() {
        let t = PrimeTable::global();
        assert_eq!(t.len(), 500);
        assert_eq!(t.get(0), Some(2));
        assert_eq!(t.get(499), Some(3571));
        assert!(t.as_slice().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_index_of() {
        let t = PrimeTable::global();
        assert_eq!(t.index_of(31), Some(10));
        assert_eq!(t.index_of(97), Some(24));
        assert_eq!(t.index_of(33), None);
        assert!(!t.contains(3581));
    }

    #[test]
    fn test_is_prime() {
        assert!(!is_prime(0));
        assert!(!is_prime(1));
        assert!(is_prime(2));
        assert!(is_prime(97));
        assert!(!is_prime(91));
        assert!(is_prime(3581));
    }

    #[test]
    fn test_short_table() {
        let t = PrimeTable::with_len(5);
        assert_eq!(t.as_slice(), &[2, 3, 5, 7, 11]);
    }
}
