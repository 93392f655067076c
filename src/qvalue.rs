//! Storey-Tibshirani q-values
//!
//! The q-value of a test is the minimum false discovery rate at which the
//! test is called significant. It is computed from the p-values of all
//! tests and an estimate of π₀, the proportion of truly null tests.
//!
//! π₀ is estimated with [`Pi0Method::Smoother`] by default: the proportion of
//! p-values above λ, `#{p > λ} / (m (1 - λ))`, is calculated for
//! λ = 0.01, 0.02, ... 0.95, a cubic [`SmoothingSpline`] is fitted through
//! these values and evaluated at λ = 1.
//!
//! Storey JD, Tibshirani R. Statistical significance for genomewide studies.
//! PNAS 100(16), 2003.
//!
//! # Examples
//!
//! ```
//! use phewas_stats::qvalue::{qvalues, QValues, Pi0Method};
//!
//! let pvalues = [0.001, 0.01, 0.5, 0.9, 0.99];
//!
//! let q = qvalues(&pvalues).unwrap();
//! assert!(q.windows(2).all(|w| w[0] <= w[1]));
//!
//! // the original Storey (2002) estimator with a single λ
//! let q = QValues::new()
//!     .pi0_method(Pi0Method::Lambda(0.5))
//!     .qvalues(&pvalues)
//!     .unwrap();
//! assert_eq!(q.len(), 5);
//! ```
use tracing::debug;

use crate::{f64_from_usize, StatsError, StatsResult};

mod spline;
pub use spline::SmoothingSpline;

/// Number of λ values used by [`Pi0Method::Smoother`]
pub const LAMBDA_GRID_SIZE: usize = 95;

/// The λ grid: `0.01, 0.02, ..., 0.95`
///
/// The values are computed as `i / 100` to keep them as close as
/// possible to their decimal representation.
pub fn lambda_grid() -> Vec<f64> {
    (1..=LAMBDA_GRID_SIZE)
        .map(|i| f64_from_usize(i) / 100.0)
        .collect()
}

/// Builtin methods to estimate π₀
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Pi0Method {
    /// Cubic smoothing spline over the [`lambda_grid`], evaluated at λ = 1
    ///
    /// The smoothing factor equals the number of grid points. The result is
    /// not clamped and can be slightly above 1 or below 0.
    #[default]
    Smoother,
    /// Single λ estimate `#{p > λ} / (m (1 - λ))`
    Lambda(f64),
}

/// The π₀ estimate and the values it is based on
#[derive(Debug, Clone)]
pub struct Pi0Estimate {
    lambdas: Vec<f64>,
    pi0_lambda: Vec<f64>,
    pi0: f64,
}

impl Pi0Estimate {
    /// The estimated proportion of truly null tests
    pub fn pi0(&self) -> f64 {
        self.pi0
    }

    /// The λ values used
    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    /// π̂₀(λ) for every λ of [`Pi0Estimate::lambdas`]
    pub fn pi0_lambda(&self) -> &[f64] {
        &self.pi0_lambda
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Calculates q-values from p-values
///
/// ```mermaid
/// graph LR
///     P[p-values] --> S[sort ascending]
///     S --> L["π̂₀(λ) for every λ"]
///     L --> F[cubic smoothing spline]
///     F --> E["π̂₀ = spline(1)"]
///     E --> Q["q(i) = min(π̂₀ m p(i) / i, q(i+1))"]
///     Q --> O[original order]
/// ```
///
/// # Examples
///
/// ```
/// use phewas_stats::qvalue::QValues;
///
/// let pvalues: Vec<f64> = (0..200).map(|i| (f64::from(i) + 0.5) / 200.0).collect();
///
/// let estimator = QValues::new();
/// let pi0 = estimator.estimate_pi0(&pvalues).unwrap();
///
/// // uniform p-values are all null
/// assert!((pi0.pi0() - 1.0).abs() < 0.1);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct QValues {
    pi0_method: Pi0Method,
}

impl QValues {
    /// Constructs a new estimator using [`Pi0Method::Smoother`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the method to estimate π₀
    #[must_use]
    pub fn pi0_method(mut self, method: Pi0Method) -> Self {
        self.pi0_method = method;
        self
    }

    /// Estimates π₀
    ///
    /// # Errors
    ///
    /// - [`StatsError::EmptyInput`] if no p-values are provided
    /// - [`StatsError::InvalidPValue`] if any p-value is `NaN` or outside `[0, 1]`
    /// - [`StatsError::InvalidLambda`] for [`Pi0Method::Lambda`] outside `[0, 1)`
    pub fn estimate_pi0(&self, pvalues: &[f64]) -> StatsResult<Pi0Estimate> {
        validate(pvalues)?;
        if pvalues.is_empty() {
            return Err(StatsError::EmptyInput);
        }
        let sorted = sorted_pvalues(pvalues);
        self.pi0_from_sorted(&sorted)
    }

    /// Calculates the q-values, in the order of `pvalues`
    ///
    /// An empty input returns an empty result.
    ///
    /// # Errors
    ///
    /// - [`StatsError::InvalidPValue`] if any p-value is `NaN` or outside `[0, 1]`
    /// - [`StatsError::InvalidLambda`] for [`Pi0Method::Lambda`] outside `[0, 1)`
    pub fn qvalues(&self, pvalues: &[f64]) -> StatsResult<Vec<f64>> {
        validate(pvalues)?;
        if pvalues.is_empty() {
            return Ok(Vec::new());
        }

        let order = argsort(pvalues);
        let sorted: Vec<f64> = order.iter().map(|idx| pvalues[*idx]).collect();
        let pi0 = self.pi0_from_sorted(&sorted)?.pi0();

        let step_up = step_up(&sorted, pi0);
        let mut q = vec![0.0; pvalues.len()];
        for (rank, idx) in order.into_iter().enumerate() {
            q[idx] = step_up[rank];
        }
        Ok(q)
    }

    fn pi0_from_sorted(&self, sorted: &[f64]) -> StatsResult<Pi0Estimate> {
        let estimate = match self.pi0_method {
            Pi0Method::Smoother => {
                let lambdas = lambda_grid();
                let pi0_lambda: Vec<f64> = lambdas
                    .iter()
                    .map(|lambda| pi0_at(sorted, *lambda))
                    .collect();
                let spline = SmoothingSpline::fit(
                    &lambdas,
                    &pi0_lambda,
                    f64_from_usize(lambdas.len()),
                )?;
                let pi0 = spline.evaluate(1.0);
                Pi0Estimate {
                    lambdas,
                    pi0_lambda,
                    pi0,
                }
            }
            Pi0Method::Lambda(lambda) => {
                if !(0.0..1.0).contains(&lambda) {
                    return Err(StatsError::InvalidLambda(lambda));
                }
                let pi0 = pi0_at(sorted, lambda);
                Pi0Estimate {
                    lambdas: vec![lambda],
                    pi0_lambda: vec![pi0],
                    pi0,
                }
            }
        };
        debug!("pi0 estimate from {} p-values: {}", sorted.len(), estimate.pi0);
        Ok(estimate)
    }
}

/// Calculates q-values with the default [`QValues`] estimator
///
/// # Errors
///
/// [`StatsError::InvalidPValue`] if any p-value is `NaN` or outside `[0, 1]`
pub fn qvalues(pvalues: &[f64]) -> StatsResult<Vec<f64>> {
    QValues::new().qvalues(pvalues)
}

/// Estimates π₀ with [`Pi0Method::Smoother`]
///
/// # Errors
///
/// See [`QValues::estimate_pi0`]
pub fn estimate_pi0(pvalues: &[f64]) -> StatsResult<Pi0Estimate> {
    QValues::new().estimate_pi0(pvalues)
}

fn validate(pvalues: &[f64]) -> StatsResult<()> {
    match pvalues
        .iter()
        .enumerate()
        .find(|(_, p)| !(0.0..=1.0).contains(*p))
    {
        Some((index, value)) => Err(StatsError::InvalidPValue {
            index,
            value: *value,
        }),
        None => Ok(()),
    }
}

/// Indices that sort `pvalues` ascending, ties keep their input order
fn argsort(pvalues: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..pvalues.len()).collect();
    order.sort_by(|a, b| pvalues[*a].total_cmp(&pvalues[*b]));
    order
}

fn sorted_pvalues(pvalues: &[f64]) -> Vec<f64> {
    let mut sorted = pvalues.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// `#{p > λ} / (m (1 - λ))` for ascending sorted p-values
fn pi0_at(sorted: &[f64], lambda: f64) -> f64 {
    let m = sorted.len();
    let above = m - sorted.partition_point(|p| *p <= lambda);
    f64_from_usize(above) / (f64_from_usize(m) * (1.0 - lambda))
}

/// q-values of ascending sorted p-values
///
/// Walks from the largest p-value down, so that a q-value never exceeds
/// the q-value of a less significant test.
fn step_up(sorted: &[f64], pi0: f64) -> Vec<f64> {
    let m = sorted.len();
    let total = f64_from_usize(m);
    let mut q = vec![0.0; m];
    q[m - 1] = pi0 * sorted[m - 1];
    for i in (0..m - 1).rev() {
        let candidate = pi0 * total * sorted[i] / f64_from_usize(i + 1);
        q[i] = candidate.min(q[i + 1]);
    }
    q
}

#[cfg(test)]
mod test {
    use super::*;

    fn is_monotone_in_p(p: &[f64], q: &[f64]) -> bool {
        let order = argsort(p);
        order.windows(2).all(|w| q[w[0]] <= q[w[1]])
    }

    #[test]
    fn lambda_grid_values() {
        let grid = lambda_grid();
        assert_eq!(grid.len(), 95);
        assert!((grid[0] - 0.01).abs() < f64::EPSILON);
        assert!((grid[49] - 0.5).abs() < f64::EPSILON);
        assert!((grid[94] - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn pi0_at_counts_strictly_greater() {
        let sorted = [0.1, 0.2, 0.5, 0.5, 0.9];
        assert!((pi0_at(&sorted, 0.5) - 1.0 / (5.0 * 0.5)).abs() < f64::EPSILON);
        assert!((pi0_at(&sorted, 0.0) - 1.0).abs() < f64::EPSILON);
        assert!(pi0_at(&sorted, 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn five_pvalues() {
        let p = [0.001, 0.01, 0.5, 0.9, 0.99];
        let q = qvalues(&p).unwrap();
        assert_eq!(q.len(), 5);
        for w in q.windows(2) {
            assert!(w[0] <= w[1]);
        }
        let pi0 = estimate_pi0(&p).unwrap().pi0();
        assert!(pi0 > 0.0);
        assert!(q[0] * 10.0 < q[4]);
        assert!((q[4] - pi0 * 0.99).abs() < 1e-12);
    }

    #[test]
    fn pi0_reference_values() {
        // cubic least-squares fits of pi0(lambda), evaluated at 1
        let pi0 = estimate_pi0(&[0.001, 0.01, 0.5, 0.9, 0.99]).unwrap().pi0();
        assert!((pi0 - 4.155_183_528_690_499_5).abs() < 1e-12, "pi0 = {pi0}");

        let pi0 = estimate_pi0(&[0.3]).unwrap().pi0();
        assert!((pi0 - 0.441_784_410_389_739_8).abs() < 1e-12, "pi0 = {pi0}");

        let p: Vec<f64> = (0..1000).map(|i| (f64::from(i) + 0.5) / 1000.0).collect();
        let pi0 = estimate_pi0(&p).unwrap().pi0();
        assert!((pi0 - 1.0).abs() < 1e-12, "pi0 = {pi0}");

        // needs interior knots and smoothing
        let pi0 = estimate_pi0(&[0.95]).unwrap().pi0();
        assert!((pi0 + 56.799_526_706_543_87).abs() < 1e-6, "pi0 = {pi0}");
    }

    #[test]
    fn qvalue_reference_values() {
        let q = qvalues(&[0.001, 0.01, 0.5, 0.9, 0.99]).unwrap();
        let expected = [
            0.020_775_917_643_452_498,
            0.103_879_588_217_262_5,
            3.462_652_940_575_416_5,
            4.113_631_693_403_595,
            4.113_631_693_403_595,
        ];
        for (q, expected) in q.iter().zip(expected) {
            assert!((q - expected).abs() < 1e-11, "{q} != {expected}");
        }
    }

    #[test]
    fn order_is_preserved() {
        let p = [0.9, 0.001, 0.5, 0.99, 0.01];
        let q = qvalues(&p).unwrap();
        assert!(is_monotone_in_p(&p, &q));

        let sorted = qvalues(&[0.001, 0.01, 0.5, 0.9, 0.99]).unwrap();
        assert!((q[1] - sorted[0]).abs() < f64::EPSILON);
        assert!((q[4] - sorted[1]).abs() < f64::EPSILON);
        assert!((q[2] - sorted[2]).abs() < f64::EPSILON);
        assert!((q[0] - sorted[3]).abs() < f64::EPSILON);
        assert!((q[3] - sorted[4]).abs() < f64::EPSILON);
    }

    #[test]
    fn permutation_invariant() {
        let p: Vec<f64> = (0..300)
            .map(|i| ((i * 7919) % 1000) as f64 / 1000.0)
            .map(|x: f64| x.powi(2))
            .collect();
        let q = qvalues(&p).unwrap();

        // reverse and rotate
        let perm: Vec<usize> = (0..p.len()).map(|i| (p.len() - 1 - i + 17) % p.len()).collect();
        let permuted: Vec<f64> = perm.iter().map(|i| p[*i]).collect();
        let q_permuted = qvalues(&permuted).unwrap();

        for (pos, idx) in perm.iter().enumerate() {
            assert!((q_permuted[pos] - q[*idx]).abs() < f64::EPSILON);
        }
        assert!(is_monotone_in_p(&p, &q));
    }

    #[test]
    fn ties_share_qvalues() {
        let p = [0.02, 0.5, 0.02, 0.7, 0.02, 0.3];
        let q = QValues::new()
            .pi0_method(Pi0Method::Lambda(0.5))
            .qvalues(&p)
            .unwrap();
        assert!((q[0] - q[2]).abs() < f64::EPSILON);
        assert!((q[0] - q[4]).abs() < f64::EPSILON);
    }

    #[test]
    fn single_pvalue() {
        let q = qvalues(&[0.3]).unwrap();
        assert_eq!(q.len(), 1);
        let pi0 = estimate_pi0(&[0.3]).unwrap().pi0();
        assert!((q[0] - pi0 * 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_input() {
        assert!(qvalues(&[]).unwrap().is_empty());
        assert_eq!(estimate_pi0(&[]).unwrap_err(), StatsError::EmptyInput);
    }

    #[test]
    fn all_significant() {
        let p = vec![1e-12; 50];
        let estimate = estimate_pi0(&p).unwrap();
        assert!(estimate.pi0_lambda().iter().all(|x| *x == 0.0));
        assert!(estimate.pi0().abs() < 1e-9);

        let q = qvalues(&p).unwrap();
        assert!(q.iter().all(|x| x.abs() < 1e-9));
    }

    #[test]
    fn uniform_pvalues() {
        let p: Vec<f64> = (0..1000).map(|i| (f64::from(i) + 0.5) / 1000.0).collect();
        let pi0 = estimate_pi0(&p).unwrap().pi0();
        assert!((pi0 - 1.0).abs() < 0.05, "pi0 = {pi0}");
    }

    #[test]
    fn mixture_of_signal_and_null() {
        let mut p: Vec<f64> = (0..900).map(|i| (f64::from(i) + 0.5) / 900.0).collect();
        p.extend((0..100).map(|i| 1e-6 * f64::from(i + 1)));
        let pi0 = estimate_pi0(&p).unwrap().pi0();
        assert!((pi0 - 0.9).abs() < 0.05, "pi0 = {pi0}");

        let q = qvalues(&p).unwrap();
        assert!(is_monotone_in_p(&p, &q));
        assert!(q[900..].iter().all(|x| *x < 0.01));
    }

    #[test]
    fn single_lambda() {
        let p = [0.1, 0.2, 0.6, 0.7, 0.8];
        let estimate = QValues::new()
            .pi0_method(Pi0Method::Lambda(0.5))
            .estimate_pi0(&p)
            .unwrap();
        assert!((estimate.pi0() - 3.0 / 2.5).abs() < f64::EPSILON);
        assert_eq!(estimate.lambdas(), &[0.5]);

        let q = QValues::new()
            .pi0_method(Pi0Method::Lambda(0.5))
            .qvalues(&p)
            .unwrap();
        assert!((q[4] - 1.2 * 0.8).abs() < 1e-12);
        assert!((q[0] - (1.2 * 5.0 * 0.1_f64).min(q[1])).abs() < 1e-12);
    }

    #[test]
    fn invalid_lambda() {
        let res = QValues::new()
            .pi0_method(Pi0Method::Lambda(1.0))
            .qvalues(&[0.1, 0.2]);
        assert_eq!(res.unwrap_err(), StatsError::InvalidLambda(1.0));
    }

    #[test]
    fn invalid_pvalues() {
        assert!(matches!(
            qvalues(&[0.1, f64::NAN]),
            Err(StatsError::InvalidPValue { index: 1, .. })
        ));
        assert!(matches!(
            qvalues(&[0.1, 1.5]),
            Err(StatsError::InvalidPValue { index: 1, .. })
        ));
        assert!(matches!(
            qvalues(&[-0.1, 0.5]),
            Err(StatsError::InvalidPValue { index: 0, .. })
        ));
    }

    #[test]
    fn boundary_pvalues_are_valid() {
        let q = qvalues(&[0.0, 1.0, 0.5]).unwrap();
        assert_eq!(q.len(), 3);
        assert!(q[0] <= q[2] && q[2] <= q[1]);
    }
}
