//! Hypergeometric distribution of the top-left cell of a 2x2 table
//!
//! With fixed margins, the count in the top-left cell of a 2x2 contingency
//! table follows a hypergeometric distribution. Fisher's exact test sums
//! the probabilities of all tables that are at most as likely as the
//! observed one.
use statrs::distribution::{Discrete, Hypergeometric};
use statrs::statistics::{Max, Min};

/// Tables are "as likely" as the observed one within this relative error
const RELATIVE_TOLERANCE: f64 = 1e-7;

/// The distribution of the top-left cell of `table`
///
/// - population (N): all genes
/// - successes (K): genes in the first column
/// - draws (n): genes in the first row
pub(super) fn from_table(table: [[u64; 2]; 2]) -> Hypergeometric {
    let [[a, b], [c, d]] = table;
    Hypergeometric::new(a + b + c + d, a + c, a + b)
        .expect("table margins cannot exceed the table total")
}

/// Probability of `x` successes
///
/// Computed on log scale, the plain binomial coefficients overflow
/// for a few thousand genes.
fn pmf(hyper: &Hypergeometric, x: u64) -> f64 {
    hyper.ln_pmf(x).exp()
}

/// Two-sided p-value of observing `x`
///
/// Sums the probability of every value that is not more likely than `x`.
pub(super) fn two_sided(hyper: &Hypergeometric, x: u64) -> f64 {
    let threshold = pmf(hyper, x) * (1.0 + RELATIVE_TOLERANCE);
    let pvalue: f64 = (hyper.min()..=hyper.max())
        .map(|i| pmf(hyper, i))
        .filter(|p| *p <= threshold)
        .sum();
    pvalue.min(1.0)
}
