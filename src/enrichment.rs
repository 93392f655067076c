//! Enrichment of drug targets among significant genes
//!
//! For one outcome and one drug class (e.g. an ATC code), every gene is
//! either significantly associated with the outcome or not, and it is either
//! a known target of the drug class or not. The genes are tallied into a
//! 2x2 contingency table and Fisher's exact test checks if targets are
//! enriched among the significant genes.
//!
//! |                 | target | not a target |
//! |-----------------|--------|--------------|
//! | significant     | `n00`  | `n01`        |
//! | not significant | `n10`  | `n11`        |
//!
//! The [`batch`] module runs the test for many drug classes in parallel.
//!
//! # Examples
//!
//! ```
//! use phewas_stats::enrichment::fisher_enrichment;
//!
//! let is_significant = [true, true, false, false];
//! let is_target = [true, false, true, false];
//!
//! let table = fisher_enrichment(&is_significant, &is_target).unwrap();
//! assert_eq!(table.counts(), [[1, 1], [1, 1]]);
//! assert!((table.pvalue() - 1.0).abs() < 1e-12);
//! ```
use serde::Serialize;
use tracing::debug;

use crate::{f64_from_u64, StatsError, StatsResult};

pub mod batch;
mod hypergeom;

/// Odds ratio and p-value of Fisher's exact test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisherExact {
    odds_ratio: f64,
    pvalue: f64,
}

impl FisherExact {
    /// The sample odds ratio `(n00 * n11) / (n01 * n10)`
    ///
    /// `inf` if `n01` or `n10` is `0`, `NaN` if the table has an empty row
    /// or column.
    pub fn odds_ratio(&self) -> f64 {
        self.odds_ratio
    }

    /// The two-sided p-value
    pub fn pvalue(&self) -> f64 {
        self.pvalue
    }
}

/// Two-sided Fisher's exact test on a 2x2 table
///
/// The p-value is the sum of the probabilities of all tables with the same
/// margins that are not more likely than the observed table. Tables with an
/// empty row or column return a p-value of `1.0`.
///
/// # Examples
///
/// ```
/// use phewas_stats::enrichment::fisher_exact;
///
/// let result = fisher_exact([[8, 2], [1, 5]]);
/// assert!((result.odds_ratio() - 20.0).abs() < 1e-12);
/// assert!((result.pvalue() - 0.034965034965035).abs() < 1e-12);
/// ```
pub fn fisher_exact(table: [[u64; 2]; 2]) -> FisherExact {
    let [[a, b], [c, d]] = table;
    if has_empty_margin(table) {
        return FisherExact {
            odds_ratio: f64::NAN,
            pvalue: 1.0,
        };
    }

    let odds_ratio = if b > 0 && c > 0 {
        (f64_from_u64(a) * f64_from_u64(d)) / (f64_from_u64(b) * f64_from_u64(c))
    } else {
        f64::INFINITY
    };

    let pvalue = hypergeom::two_sided(&hypergeom::from_table(table), a);
    FisherExact { odds_ratio, pvalue }
}

fn has_empty_margin(table: [[u64; 2]; 2]) -> bool {
    let [[a, b], [c, d]] = table;
    a + b == 0 || c + d == 0 || a + c == 0 || b + d == 0
}

/// Gene counts of significance and target membership, with the test result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContingencyTable {
    n00: u64,
    n01: u64,
    n10: u64,
    n11: u64,
    odds_ratio: f64,
    #[serde(rename = "p")]
    pvalue: f64,
}

impl ContingencyTable {
    /// Significant targets
    pub fn n00(&self) -> u64 {
        self.n00
    }

    /// Significant genes that are not targets
    pub fn n01(&self) -> u64 {
        self.n01
    }

    /// Targets that are not significant
    pub fn n10(&self) -> u64 {
        self.n10
    }

    /// Genes that are neither significant nor targets
    pub fn n11(&self) -> u64 {
        self.n11
    }

    /// The counts as `[[n00, n01], [n10, n11]]`
    pub fn counts(&self) -> [[u64; 2]; 2] {
        [[self.n00, self.n01], [self.n10, self.n11]]
    }

    /// The odds ratio, `NaN` if there are no significant targets
    pub fn odds_ratio(&self) -> f64 {
        self.odds_ratio
    }

    /// The two-sided p-value
    pub fn pvalue(&self) -> f64 {
        self.pvalue
    }

    /// Returns `true` if a row or column of the table is empty
    ///
    /// This happens if all or none of the genes are significant, or
    /// all or none of the genes are targets.
    pub fn has_empty_margin(&self) -> bool {
        has_empty_margin(self.counts())
    }
}

/// Tallies the genes and runs Fisher's exact test
///
/// If no gene is both significant and a target (`n00 == 0`), the test
/// is skipped: the odds ratio is `NaN` and the p-value `1.0`.
///
/// # Errors
///
/// [`StatsError::LengthMismatch`] if the two slices differ in length
pub fn fisher_enrichment(is_significant: &[bool], is_target: &[bool]) -> StatsResult<ContingencyTable> {
    if is_significant.len() != is_target.len() {
        return Err(StatsError::LengthMismatch {
            left: is_significant.len(),
            right: is_target.len(),
        });
    }

    let mut counts = [[0u64; 2]; 2];
    for (significant, target) in is_significant.iter().zip(is_target) {
        counts[usize::from(!significant)][usize::from(!target)] += 1;
    }
    let [[n00, n01], [n10, n11]] = counts;

    let test = if n00 == 0 {
        debug!("No significant targets, skipping Fisher's exact test");
        FisherExact {
            odds_ratio: f64::NAN,
            pvalue: 1.0,
        }
    } else {
        fisher_exact(counts)
    };

    Ok(ContingencyTable {
        n00,
        n01,
        n10,
        n11,
        odds_ratio: test.odds_ratio,
        pvalue: test.pvalue,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn balanced_table() {
        let table = fisher_enrichment(&[true, true, false, false], &[true, false, true, false]).unwrap();
        assert_eq!(table.n00(), 1);
        assert_eq!(table.n01(), 1);
        assert_eq!(table.n10(), 1);
        assert_eq!(table.n11(), 1);
        assert!((table.odds_ratio() - 1.0).abs() < f64::EPSILON);
        assert!((table.pvalue() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_significant_targets() {
        let is_significant = [true, true, true, false, false, false, false];
        let is_target = [false, false, false, true, true, true, false];
        let table = fisher_enrichment(&is_significant, &is_target).unwrap();
        assert_eq!(table.counts(), [[0, 3], [3, 1]]);
        assert!(table.odds_ratio().is_nan());
        assert!((table.pvalue() - 1.0).abs() < f64::EPSILON);

        // the exact test would not return 1
        assert!(fisher_exact(table.counts()).pvalue() < 1.0);
    }

    #[test]
    fn length_mismatch() {
        assert_eq!(
            fisher_enrichment(&[true, false], &[true]).unwrap_err(),
            StatsError::LengthMismatch { left: 2, right: 1 }
        );
    }

    #[test]
    fn enriched_targets() {
        // 5 significant targets, 3 significant non-targets,
        // 2 targets and 90 non-targets among non-significant genes
        let mut is_significant = vec![true; 8];
        is_significant.extend(vec![false; 92]);
        let mut is_target = vec![true; 5];
        is_target.extend(vec![false; 3]);
        is_target.extend(vec![true; 2]);
        is_target.extend(vec![false; 90]);

        let table = fisher_enrichment(&is_significant, &is_target).unwrap();
        assert_eq!(table.counts(), [[5, 3], [2, 90]]);
        assert!((table.odds_ratio() - 75.0).abs() < 1e-12);
        assert!(table.pvalue() < 1e-4);
    }

    #[test]
    fn exact_test_values() {
        let res = fisher_exact([[3, 1], [1, 3]]);
        assert!((res.odds_ratio() - 9.0).abs() < f64::EPSILON);
        assert!((res.pvalue() - 0.485_714_285_714_285_7).abs() < 1e-12);

        let res = fisher_exact([[10, 0], [0, 10]]);
        assert!(res.odds_ratio().is_infinite());
        assert!((res.pvalue() - 1.082_508_822_446_903e-5).abs() < 1e-13);

        let res = fisher_exact([[2, 3], [10, 200]]);
        assert!((res.pvalue() - 0.026_080_477_240_992_54).abs() < 1e-12);

        let res = fisher_exact([[5, 0], [3, 40]]);
        assert!(res.odds_ratio().is_infinite());
        assert!((res.pvalue() - 3.270_447_303_749_802e-5).abs() < 1e-13);
    }

    #[test]
    fn exact_test_empty_margin() {
        let res = fisher_exact([[0, 0], [3, 4]]);
        assert!(res.odds_ratio().is_nan());
        assert!((res.pvalue() - 1.0).abs() < f64::EPSILON);

        let res = fisher_exact([[2, 0], [3, 0]]);
        assert!(res.odds_ratio().is_nan());
    }

    #[test]
    fn serialize_field_names() {
        let table = fisher_enrichment(&[true, true, false, false], &[true, false, true, false]).unwrap();
        let json = serde_json::to_value(table).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["n00", "n01", "n10", "n11", "odds_ratio", "p"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj.len(), 6);
    }
}
