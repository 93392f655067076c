//! Drug target enrichment for many drug classes at once
//!
//! Each outcome is tested against every drug class (e.g. all ATC codes).
//! The classes are independent of each other and are processed in parallel.
//!
//! # Examples
//!
//! ```
//! use phewas_stats::enrichment::batch::{class_enrichments, TargetClass};
//!
//! let is_significant = [true, true, true, false, false, false, false, false];
//! let classes = vec![
//!     TargetClass::new("C10AA", vec![true, true, false, false, true, false, false, false]),
//!     // a single target, will be skipped
//!     TargetClass::new("N02BE", vec![false, false, false, true, false, false, false, false]),
//! ];
//!
//! let results = class_enrichments(&is_significant, &classes).unwrap();
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].code(), "C10AA");
//! assert_eq!(results[0].table().n00(), 2);
//! ```
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::enrichment::{fisher_enrichment, ContingencyTable};
use crate::qvalue::qvalues;
use crate::{StatsError, StatsResult};

/// Genes with a q-value at or below this threshold are significant
pub const DEFAULT_Q_THRESHOLD: f64 = 0.01;

/// Flags every gene with `q <= threshold`
///
/// ```
/// use phewas_stats::enrichment::batch::significant;
///
/// assert_eq!(significant(&[0.001, 0.01, 0.2], 0.01), vec![true, true, false]);
/// ```
pub fn significant(qvalues: &[f64], threshold: f64) -> Vec<bool> {
    qvalues.iter().map(|q| *q <= threshold).collect()
}

/// A drug class and the genes that are targeted by it
///
/// `targets` is aligned to the genes of the outcome, i.e. `targets[i]`
/// states if the i-th gene is a target of any drug in the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetClass {
    code: String,
    targets: Vec<bool>,
}

impl TargetClass {
    /// Constructs a new `TargetClass`
    pub fn new<S: Into<String>>(code: S, targets: Vec<bool>) -> Self {
        Self {
            code: code.into(),
            targets,
        }
    }

    /// The code of the class, e.g. `C10AA`
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The target flag of every gene
    pub fn targets(&self) -> &[bool] {
        &self.targets
    }

    /// The number of genes targeted by the class
    pub fn n_targets(&self) -> usize {
        self.targets.iter().filter(|t| **t).count()
    }
}

/// Enrichment result of a single drug class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassEnrichment {
    code: String,
    #[serde(flatten)]
    table: ContingencyTable,
}

impl ClassEnrichment {
    /// The code of the drug class
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The contingency table and Fisher's exact test of the class
    pub fn table(&self) -> &ContingencyTable {
        &self.table
    }
}

/// Runs [`fisher_enrichment`] for every class in parallel
///
/// Classes with at most one target are skipped, as are classes whose
/// contingency table has an empty row or column. The results are in the
/// same order as `classes`.
///
/// # Errors
///
/// [`StatsError::LengthMismatch`] if the targets of a class are not
/// aligned to `is_significant`
pub fn class_enrichments(
    is_significant: &[bool],
    classes: &[TargetClass],
) -> StatsResult<Vec<ClassEnrichment>> {
    let results: Vec<ClassEnrichment> = classes
        .par_iter()
        .filter_map(|class| class_enrichment(is_significant, class).transpose())
        .collect::<StatsResult<_>>()?;
    debug!(
        "Tested {} of {} classes for enrichment",
        results.len(),
        classes.len()
    );
    Ok(results)
}

fn class_enrichment(
    is_significant: &[bool],
    class: &TargetClass,
) -> StatsResult<Option<ClassEnrichment>> {
    if class.targets.len() != is_significant.len() {
        return Err(StatsError::LengthMismatch {
            left: is_significant.len(),
            right: class.targets.len(),
        });
    }
    if class.n_targets() <= 1 {
        trace!("Skipping {}: not enough targets", class.code);
        return Ok(None);
    }

    let table = fisher_enrichment(is_significant, &class.targets)?;
    if table.has_empty_margin() {
        warn!("Skipping {}: table {:?} has an empty margin", class.code, table.counts());
        return Ok(None);
    }

    Ok(Some(ClassEnrichment {
        code: class.code.clone(),
        table,
    }))
}

/// Calculates q-values of an outcome and tests every class for enrichment
///
/// # Errors
///
/// - Invalid p-values, see [`qvalues`]
/// - [`StatsError::LengthMismatch`], see [`class_enrichments`]
pub fn outcome_enrichment(
    pvalues: &[f64],
    classes: &[TargetClass],
    q_threshold: f64,
) -> StatsResult<Vec<ClassEnrichment>> {
    let q = qvalues(pvalues)?;
    let is_significant = significant(&q, q_threshold);
    class_enrichments(&is_significant, classes)
}
