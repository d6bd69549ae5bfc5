//! Projection engine: turns one triad into a trajectory of projected prices.
//!
//! The recurrence is cumulative. Each step starts from the previous projected
//! price, and both the delta and the new price are truncated (not rounded) to
//! the requested precision.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, ProjectionError, Result};
use crate::phase::{
    growth_step, omega_gate, psi_from_depth, theta_step, truncate, Lambda, PsiInput, SECTORS,
};
use crate::primes::PrimeTable;
use crate::triads::{self, Triad};

pub const PRICE_FLOOR: f64 = 0.01;
pub const MAX_DECIMALS: u32 = 12;

const SECTOR_OFFSETS: [u32; SECTORS] = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144];

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionParams {
    pub depth_prime: u32,
    pub steps: usize,
    pub projection_count: usize,
    /// Carried through config and snapshots; the recurrence does not read it.
    pub base: f64,
    pub decimals: u32,
    pub frequency_hz: f64,
    pub lambda_schedule: Vec<Lambda>,
    #[serde(default)]
    pub frequency_schedule: Option<Vec<f64>>,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            depth_prime: 31,
            steps: 20,
            projection_count: 12,
            base: 3.0,
            decimals: 4,
            frequency_hz: 432.0,
            lambda_schedule: Lambda::default_schedule(),
            frequency_schedule: None,
        }
    }
}

fn check_frequency(f: f64) -> Result<()> {
    if f.is_finite() && f > 0.0 {
        Ok(())
    } else {
        Err(DomainError::Frequency(f).into())
    }
}

impl ProjectionParams {
    pub fn validate(&self, table: &PrimeTable) -> Result<()> {
        triads::locate_depth(self.depth_prime, table)?;
        if self.steps == 0 {
            return Err(DomainError::ZeroSteps.into());
        }
        if self.projection_count == 0 {
            return Err(DomainError::ZeroProjectionCount.into());
        }
        if self.decimals > MAX_DECIMALS {
            return Err(DomainError::Precision(self.decimals).into());
        }
        if self.lambda_schedule.is_empty() {
            return Err(DomainError::EmptyLambdaSchedule.into());
        }
        check_frequency(self.frequency_hz)?;
        if let Some(schedule) = &self.frequency_schedule {
            for &f in schedule {
                check_frequency(f)?;
            }
        }
        Ok(())
    }

    /// Frequency schedule, treating an empty one as absent.
    pub fn frequencies(&self) -> Option<&[f64]> {
        self.frequency_schedule
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionLine {
    pub triad: Triad,
    pub points: Vec<f64>,
    pub confidence: f64,
}

impl ProjectionLine {
    pub fn id(&self, idx: usize) -> String {
        format!("lattice-{}-{}", idx, self.triad.label())
    }
}

/// 1 / (1 + coefficient of variation) of the points.
pub fn line_confidence(points: &[f64]) -> f64 {
    if points.len() < 2 {
        return if points.is_empty() { 0.0 } else { 1.0 };
    }
    let n = points.len() as f64;
    let mean = points.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = points.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    (1.0 / (1.0 + var.sqrt() / mean)).clamp(0.0, 1.0)
}

// =============================================================================
// Engine
// =============================================================================

/// Inputs for a single triad run.
#[derive(Debug, Clone)]
pub struct TriadRun<'a> {
    pub last_price: f64,
    pub depth_prime: u32,
    pub frequency_hz: f64,
    pub triad: Triad,
    pub decimals: u32,
    pub lambda_schedule: &'a [Lambda],
    pub frequency_schedule: Option<&'a [f64]>,
    pub steps: usize,
}

fn lattice_sum(i: usize, psi: f64, lambda: Lambda, frequency_hz: f64, growth: f64) -> f64 {
    let sector_angle = 2.0 * PI / SECTORS as f64;
    let nudge = lambda.nu() as f64 * 3.0 * (PI / 360.0);
    let omega = omega_gate(frequency_hz);
    let g_norm = (growth / 1e5).tanh();

    (0..SECTORS)
        .map(|s| {
            let base = (i + s) as f64 * sector_angle;
            let offset = (SECTOR_OFFSETS[s] % 360) as f64 * (PI / 180.0);
            let angle = base + offset + nudge + 0.5 * omega.phase;
            let pol_quad = if (s / 3) % 2 == 0 { 1.0 } else { -1.0 };
            let pol_mob = if (i + s) % 2 == 0 { 1.0 } else { -1.0 };
            angle.cos() * pol_quad * pol_mob * psi * (1.0 + 0.5 * g_norm)
        })
        .sum()
}

/// Run the recurrence for one triad, producing `steps` prices.
pub fn project(run: &TriadRun<'_>) -> Result<Vec<f64>> {
    if !(run.last_price.is_finite() && run.last_price > 0.0) {
        return Err(DomainError::LastPrice(run.last_price).into());
    }
    if run.steps == 0 {
        return Err(DomainError::ZeroSteps.into());
    }
    if run.lambda_schedule.is_empty() {
        return Err(DomainError::EmptyLambdaSchedule.into());
    }
    if run.decimals > MAX_DECIMALS {
        return Err(DomainError::Precision(run.decimals).into());
    }
    if run.depth_prime < 2 {
        return Err(DomainError::NotPrime(run.depth_prime).into());
    }
    check_frequency(run.frequency_hz)?;

    let psi = psi_from_depth(run.depth_prime);
    let tau = run.triad.tau();
    let depth_scale = (run.depth_prime as f64).log2();
    let tri_scale = tau.max(1.0);
    let frequencies = run.frequency_schedule.filter(|s| !s.is_empty());

    let mut growth = 1.0 + 0.01 * tau + 0.001 * (run.depth_prime % 7) as f64;
    let mut price = run.last_price;
    let mut out = Vec::with_capacity(run.steps);

    for i in 0..run.steps {
        let lambda = run.lambda_schedule[i % run.lambda_schedule.len()];
        let frequency = match frequencies {
            Some(s) => s[i % s.len()],
            None => run.frequency_hz,
        };
        check_frequency(frequency)?;

        let theta = theta_step(i, PsiInput::Number(psi), lambda, frequency, run.depth_prime);
        growth = growth_step(growth, theta, frequency, &run.triad);

        let sum = lattice_sum(i, psi, lambda, frequency, growth);
        let delta = truncate(sum * depth_scale * 0.5 * tri_scale, run.decimals);
        price = truncate(price + delta, run.decimals).max(PRICE_FLOOR);
        if !price.is_finite() {
            return Err(ProjectionError::Computation(format!(
                "non-finite price at step {} for triad {}",
                i,
                run.triad.label()
            )));
        }
        out.push(price);
    }
    Ok(out)
}

/// Generate triads and run the engine once per triad.
pub fn project_lines(last_price: f64, params: &ProjectionParams, table: &PrimeTable) -> Result<Vec<ProjectionLine>> {
    params.validate(table)?;
    let triads = triads::generate(params.depth_prime, params.projection_count, table)?;
    triads
        .into_iter()
        .map(|triad| {
            let points = project(&TriadRun {
                last_price,
                depth_prime: params.depth_prime,
                frequency_hz: params.frequency_hz,
                triad,
                decimals: params.decimals,
                lambda_schedule: &params.lambda_schedule,
                frequency_schedule: params.frequencies(),
                steps: params.steps,
            })?;
            let confidence = line_confidence(&points);
            Ok(ProjectionLine { triad, points, confidence })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_for(triad: Triad, steps: usize) -> TriadRun<'static> {
        static SCHEDULE: [Lambda; 3] = [Lambda::Dub, Lambda::Kubt, Lambda::KAnch];
        TriadRun {
            last_price: 100.0,
            depth_prime: 31,
            frequency_hz: 432.0,
            triad,
            decimals: 4,
            lambda_schedule: &SCHEDULE,
            frequency_schedule: None,
            steps,
        }
    }

    #[test]
    fn test_output_length_and_floor() {
        let out = project(&run_for(Triad::new(23, 29, 31), 40)).unwrap();
        assert_eq!(out.len(), 40);
        assert!(out.iter().all(|p| *p >= PRICE_FLOOR));
    }

    #[test]
    fn test_floor_applies_on_tiny_seed() {
        let mut run = run_for(Triad::new(23, 29, 31), 30);
        run.last_price = 0.02;
        let out = project(&run).unwrap();
        assert!(out.iter().all(|p| *p >= PRICE_FLOOR));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut run = run_for(Triad::new(23, 29, 31), 0);
        assert_eq!(project(&run), Err(ProjectionError::Domain(DomainError::ZeroSteps)));
        run.steps = 3;
        run.last_price = 0.0;
        assert!(matches!(project(&run), Err(ProjectionError::Domain(DomainError::LastPrice(_)))));
        run.last_price = 10.0;
        run.frequency_hz = -1.0;
        assert!(matches!(project(&run), Err(ProjectionError::Domain(DomainError::Frequency(_)))));
    }

    #[test]
    fn test_frequency_schedule_changes_path() {
        let plain = project(&run_for(Triad::new(23, 29, 31), 12)).unwrap();
        let schedule = [432.0, 528.0, 639.0];
        let mut run = run_for(Triad::new(23, 29, 31), 12);
        run.frequency_schedule = Some(&schedule);
        let scheduled = project(&run).unwrap();
        assert_ne!(plain, scheduled);
        // An empty schedule behaves like no schedule.
        let empty: [f64; 0] = [];
        run.frequency_schedule = Some(&empty);
        assert_eq!(project(&run).unwrap(), plain);
    }

    #[test]
    fn test_params_validation() {
        let table = PrimeTable::global();
        let mut p = ProjectionParams::default();
        assert!(p.validate(table).is_ok());
        p.depth_prime = 32;
        assert_eq!(p.validate(table), Err(ProjectionError::Domain(DomainError::NotPrime(32))));
        p.depth_prime = 31;
        p.decimals = 13;
        assert_eq!(p.validate(table), Err(ProjectionError::Domain(DomainError::Precision(13))));
        p.decimals = 4;
        p.lambda_schedule.clear();
        assert_eq!(p.validate(table), Err(ProjectionError::Domain(DomainError::EmptyLambdaSchedule)));
    }

    #[test]
    fn test_project_lines_one_per_triad() {
        let table = PrimeTable::global();
        let params = ProjectionParams { projection_count: 5, steps: 8, ..Default::default() };
        let lines = project_lines(250.0, &params, table).unwrap();
        assert_eq!(lines.len(), 5);
        for line in &lines {
            assert_eq!(line.points.len(), 8);
            assert!((0.0..=1.0).contains(&line.confidence));
        }
    }

    #[test]
    fn test_line_confidence() {
        assert_eq!(line_confidence(&[]), 0.0);
        assert_eq!(line_confidence(&[5.0]), 1.0);
        assert_eq!(line_confidence(&[5.0, 5.0, 5.0]), 1.0);
        assert!(line_confidence(&[1.0, 100.0]) < 0.6);
    }
}
