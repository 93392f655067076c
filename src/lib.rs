//! Statistics for gene-based phenome-wide association studies
//!
//! `phewas-stats` contains the numerical core behind a PheWAS results browser.
//! All functions are pure and operate on in-memory slices, they can be called
//! from any number of threads at the same time.
//!
//! - [`qvalue`]: Storey-Tibshirani q-values with a spline smoothed estimate of π₀
//! - [`mr`]: one-sample inverse-variance weighted Mendelian randomization
//!   using principal components as instruments
//! - [`enrichment`]: 2x2 contingency tables and Fisher's exact test to check
//!   if drug targets are enriched among significant genes
//! - [`pvalue`]: small helpers to convert stored `-log10(p)` values
//!
//! # Examples
//!
//! ```
//! use phewas_stats::qvalue::qvalues;
//!
//! let pvalues = [0.001, 0.01, 0.5, 0.9, 0.99];
//! let q = qvalues(&pvalues).unwrap();
//!
//! assert_eq!(q.len(), 5);
//! assert!(q[0] <= q[1]);
//! ```
use thiserror::Error;

pub mod enrichment;
pub mod mr;
pub mod pvalue;
pub mod qvalue;

pub use enrichment::{fisher_enrichment, ContingencyTable};
pub use mr::{ivw_mr, ModelFit, MrResult};
pub use qvalue::qvalues;

/// Inline capacity for per-instrument lists. Genes rarely need more PCs.
const DEFAULT_NUM_INSTRUMENTS: usize = 16;

/// Errors of the statistical routines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("invalid p-value {value} at position {index}")]
    InvalidPValue { index: usize, value: f64 },
    #[error("lambda must be within [0, 1), got {0}")]
    InvalidLambda(f64),
    #[error("no p-values provided")]
    EmptyInput,
    #[error("alpha must be within (0, 1), got {0}")]
    InvalidAlpha(f64),
    #[error("no usable instruments")]
    NoUsableInstruments,
    #[error("length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("invalid spline input: {0}")]
    InvalidSplineInput(String),
    #[error("singular system")]
    SingularSystem,
}

/// Shortcut for `Result<T, StatsError>`
pub type StatsResult<T> = Result<T, StatsError>;

/// Converts a count into `f64`
///
/// Counts in this crate are number of genes or tests and never
/// come close to 2^52, so the conversion is exact.
#[allow(clippy::cast_precision_loss)]
fn f64_from_usize(n: usize) -> f64 {
    n as f64
}

/// Same as [`f64_from_usize`] for `u64` tallies
#[allow(clippy::cast_precision_loss)]
fn f64_from_u64(n: u64) -> f64 {
    n as f64
}
