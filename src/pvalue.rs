//! Helpers for p-values as they are stored for PheWAS results
//!
//! Association results are stored as `-log10(p)`. Extremely significant
//! associations can be stored as `inf`, so the values are capped at
//! [`NLOG10P_CAP`] before converting them back into p-values.
use crate::f64_from_usize;

/// Largest `-log10(p)` that is kept as is
pub const NLOG10P_CAP: f64 = 500.0;

/// Caps a `-log10(p)` value at [`NLOG10P_CAP`]
///
/// Non-finite values (`inf` and `NaN`) are capped as well.
///
/// # Examples
///
/// ```
/// use phewas_stats::pvalue::{cap_nlog10p, NLOG10P_CAP};
///
/// assert_eq!(cap_nlog10p(3.0), 3.0);
/// assert_eq!(cap_nlog10p(f64::INFINITY), NLOG10P_CAP);
/// assert_eq!(cap_nlog10p(750.0), NLOG10P_CAP);
/// ```
pub fn cap_nlog10p(nlog10p: f64) -> f64 {
    if !nlog10p.is_finite() || nlog10p >= NLOG10P_CAP {
        NLOG10P_CAP
    } else {
        nlog10p
    }
}

/// Converts `-log10(p)` values into p-values
///
/// Every value is capped with [`cap_nlog10p`] first. `10^-500` is below the
/// smallest subnormal `f64`, so capped values become `0.0`.
///
/// # Examples
///
/// ```
/// use phewas_stats::pvalue::pvalues_from_nlog10;
///
/// let p = pvalues_from_nlog10(&[2.0, f64::INFINITY]);
/// assert!((p[0] - 0.01).abs() < 1e-15);
/// assert_eq!(p[1], 0.0);
/// ```
pub fn pvalues_from_nlog10(nlog10ps: &[f64]) -> Vec<f64> {
    nlog10ps
        .iter()
        .map(|x| 10f64.powf(-cap_nlog10p(*x)))
        .collect()
}

/// Bonferroni scaled p-values
///
/// Every p-value is multiplied by the number of tests. The values are
/// not capped at `1.0`.
pub fn bonferroni(pvalues: &[f64]) -> Vec<f64> {
    let m = f64_from_usize(pvalues.len());
    pvalues.iter().map(|p| p * m).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nlog10_conversion() {
        let p = pvalues_from_nlog10(&[0.0, 1.0, 3.0]);
        assert!((p[0] - 1.0).abs() < f64::EPSILON);
        assert!((p[1] - 0.1).abs() < 1e-15);
        assert!((p[2] - 0.001).abs() < 1e-15);
    }

    #[test]
    fn nlog10_capped() {
        let p = pvalues_from_nlog10(&[f64::INFINITY, 600.0, f64::NAN, 500.0]);
        assert!(p.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn bonferroni_not_capped() {
        let b = bonferroni(&[0.01, 0.5, 0.2, 0.9]);
        assert!((b[0] - 0.04).abs() < f64::EPSILON);
        assert!((b[1] - 2.0).abs() < f64::EPSILON);
        assert!((b[3] - 3.6).abs() < 1e-12);
    }

    #[test]
    fn bonferroni_empty() {
        assert!(bonferroni(&[]).is_empty());
    }
}
