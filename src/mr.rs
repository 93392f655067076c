//! One-sample Mendelian randomization with principal components as instruments
//!
//! Gene based association models regress a phenotype on the principal
//! components (PCs) of the genotypes of all variants of a gene. When the same
//! gene is tested for an exposure and for an outcome, the PCs can be used as
//! instruments for a cis Mendelian randomization: each PC yields an effect on
//! the exposure and on the outcome, and the inverse-variance weighted (IVW)
//! estimator combines them into a causal effect of the exposure on the outcome.
//!
//! Model fits contain other covariates (age, sex, ...) as well. Only terms
//! starting with the instrument prefix ([`DEFAULT_INSTRUMENT_PREFIX`]) are
//! used as instruments.
//!
//! # Examples
//!
//! ```
//! use phewas_stats::mr::{ivw_mr, ModelFit};
//!
//! let exposure: ModelFit = [
//!     ("XPC1", 0.5, 0.1),
//!     ("XPC2", 0.3, 0.1),
//!     ("age", 0.01, 0.001),
//! ].into_iter().collect();
//!
//! let outcome: ModelFit = [
//!     ("XPC1", 0.2, 0.05),
//!     ("XPC2", 0.1, 0.05),
//! ].into_iter().collect();
//!
//! let result = ivw_mr(&exposure, &outcome, Some(0.05), true).unwrap();
//!
//! assert!((result.ivw_beta() - 52.0 / 136.0).abs() < 1e-9);
//! assert_eq!(result.summary_stats().len(), 2);
//! assert!(result.wald_p().unwrap() < 0.001);
//! ```
use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use smallvec::SmallVec;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, trace};

use crate::{StatsError, StatsResult, DEFAULT_NUM_INSTRUMENTS};

/// Terms of a model fit that are instruments start with this prefix
pub const DEFAULT_INSTRUMENT_PREFIX: &str = "XPC";

/// The 0.95 quantile of the χ² distribution with 1 degree of freedom
///
/// Instruments with `(beta / se)^2` below this value are weak.
pub const CHI2_1DF_CRITICAL_05: f64 = 3.841_458_820_694_124;

/// Estimated effect of a model term
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Effect {
    beta: f64,
    se: f64,
}

impl Effect {
    /// Constructs a new `Effect` from its estimate and standard error
    pub fn new(beta: f64, se: f64) -> Self {
        Self { beta, se }
    }

    /// The effect estimate
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// The standard error of the estimate
    pub fn se(&self) -> f64 {
        self.se
    }

    /// `(beta / se)^2`, the χ² statistic of the effect
    pub fn chi2(&self) -> f64 {
        (self.beta / self.se).powi(2)
    }
}

/// The estimated coefficients of a fitted association model
///
/// The terms keep their insertion order.
///
/// # Examples
///
/// ```
/// use phewas_stats::mr::ModelFit;
///
/// let mut fit = ModelFit::new();
/// fit.insert("XPC1", 0.5, 0.1);
/// fit.insert("sex", 0.2, 0.01);
/// fit.insert("XPC2", 0.3, 0.1);
///
/// assert_eq!(fit.len(), 3);
/// assert_eq!(fit.get("sex").unwrap().beta(), 0.2);
///
/// let instruments: Vec<&str> = fit.instruments("XPC").map(|(term, _)| term).collect();
/// assert_eq!(instruments, vec!["XPC1", "XPC2"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelFit {
    terms: Vec<(String, Effect)>,
}

impl ModelFit {
    /// Constructs an empty `ModelFit`
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a term, or replaces the effect of an existing term
    pub fn insert<S: Into<String>>(&mut self, term: S, beta: f64, se: f64) {
        let term = term.into();
        let effect = Effect::new(beta, se);
        match self.terms.iter_mut().find(|(name, _)| *name == term) {
            Some(existing) => existing.1 = effect,
            None => self.terms.push((term, effect)),
        }
    }

    /// Returns the effect of `term`, if present
    pub fn get(&self, term: &str) -> Option<Effect> {
        self.terms
            .iter()
            .find(|(name, _)| name == term)
            .map(|(_, effect)| *effect)
    }

    /// The number of terms
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Returns `true` if the model has no terms
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterates all terms and their effects
    pub fn iter(&self) -> impl Iterator<Item = (&str, Effect)> {
        self.terms.iter().map(|(term, effect)| (term.as_str(), *effect))
    }

    /// Iterates the terms starting with `prefix`
    pub fn instruments<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, Effect)> {
        self.iter().filter(move |(term, _)| term.starts_with(prefix))
    }
}

impl<S: Into<String>> FromIterator<(S, f64, f64)> for ModelFit {
    fn from_iter<T: IntoIterator<Item = (S, f64, f64)>>(iter: T) -> Self {
        let mut fit = ModelFit::new();
        for (term, beta, se) in iter {
            fit.insert(term, beta, se);
        }
        fit
    }
}

/// Exposure and outcome effects of one instrument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentSummary {
    term: String,
    exposure_beta: f64,
    exposure_se: f64,
    outcome_beta: f64,
    outcome_se: f64,
    pruned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight: Option<f64>,
}

impl InstrumentSummary {
    /// The name of the instrument, e.g. `XPC1`
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Effect of the instrument on the exposure
    pub fn exposure(&self) -> Effect {
        Effect::new(self.exposure_beta, self.exposure_se)
    }

    /// Effect of the instrument on the outcome
    pub fn outcome(&self) -> Effect {
        Effect::new(self.outcome_beta, self.outcome_se)
    }

    /// Returns `true` if the instrument was excluded as weak
    pub fn pruned(&self) -> bool {
        self.pruned
    }

    /// The IVW weight `outcome_se^-2`, `None` for pruned instruments
    pub fn weight(&self) -> Option<f64> {
        self.weight
    }
}

/// Two-sided confidence interval of the causal estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    lower: f64,
    upper: f64,
    alpha: f64,
}

impl ConfidenceInterval {
    /// Lower bound
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper bound
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// The significance level of the interval
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The coverage in percent, as used in the serialized field names
    ///
    /// `alpha = 0.05` returns `"95"`, `alpha = 0.025` returns `"97.5"`
    pub fn pct_label(&self) -> String {
        let pct = ((1.0 - self.alpha) * 100.0 * 1e6).round() / 1e6;
        format!("{pct}")
    }
}

/// The IVW causal effect of an exposure on an outcome
///
/// Serializes into the fields `ivw_beta`, `ivw_se`, `summary_stats` and,
/// when a confidence level was requested, `lower_ci{pct}`, `upper_ci{pct}`
/// and `wald_p`.
#[derive(Debug, Clone)]
pub struct MrResult {
    ivw_beta: f64,
    ivw_se: f64,
    ci: Option<ConfidenceInterval>,
    wald_p: Option<f64>,
    summary_stats: SmallVec<[InstrumentSummary; DEFAULT_NUM_INSTRUMENTS]>,
}

impl MrResult {
    /// The causal effect estimate
    pub fn ivw_beta(&self) -> f64 {
        self.ivw_beta
    }

    /// The standard error of the causal effect
    pub fn ivw_se(&self) -> f64 {
        self.ivw_se
    }

    /// The confidence interval, if a significance level was provided
    pub fn confidence_interval(&self) -> Option<&ConfidenceInterval> {
        self.ci.as_ref()
    }

    /// The p-value of the Wald test, if a significance level was provided
    pub fn wald_p(&self) -> Option<f64> {
        self.wald_p
    }

    /// All instruments present in exposure and outcome, including the pruned ones
    pub fn summary_stats(&self) -> &[InstrumentSummary] {
        &self.summary_stats
    }

    /// The number of instruments used for the estimate
    pub fn n_instruments(&self) -> usize {
        self.summary_stats.iter().filter(|s| !s.pruned).count()
    }
}

impl Serialize for MrResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 3 + 2 * usize::from(self.ci.is_some()) + usize::from(self.wald_p.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("ivw_beta", &self.ivw_beta)?;
        map.serialize_entry("ivw_se", &self.ivw_se)?;
        map.serialize_entry("summary_stats", self.summary_stats.as_slice())?;
        if let Some(ci) = &self.ci {
            let pct = ci.pct_label();
            map.serialize_entry(&format!("lower_ci{pct}"), &ci.lower)?;
            map.serialize_entry(&format!("upper_ci{pct}"), &ci.upper)?;
        }
        if let Some(wald_p) = &self.wald_p {
            map.serialize_entry("wald_p", wald_p)?;
        }
        map.end()
    }
}

/// Builder for the one-sample IVW estimator
///
/// Defaults: no confidence interval, weak instruments are pruned and
/// instruments are the terms starting with [`DEFAULT_INSTRUMENT_PREFIX`].
///
/// # Examples
///
/// ```
/// use phewas_stats::mr::{ModelFit, OneSampleIvw};
///
/// let exposure: ModelFit = [("PC1", 0.5, 0.1), ("PC2", 0.01, 1.0)].into_iter().collect();
/// let outcome: ModelFit = [("PC1", 0.2, 0.05), ("PC2", 0.3, 0.05)].into_iter().collect();
///
/// let result = OneSampleIvw::new()
///     .instrument_prefix("PC")
///     .alpha(0.05)
///     .estimate(&exposure, &outcome)
///     .unwrap();
///
/// // PC2 is a weak instrument
/// assert_eq!(result.n_instruments(), 1);
/// assert!((result.ivw_beta() - 0.4).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct OneSampleIvw {
    alpha: Option<f64>,
    instrument_prune: bool,
    instrument_prefix: String,
}

impl Default for OneSampleIvw {
    fn default() -> Self {
        Self {
            alpha: None,
            instrument_prune: true,
            instrument_prefix: DEFAULT_INSTRUMENT_PREFIX.to_string(),
        }
    }
}

impl OneSampleIvw {
    /// Constructs the estimator with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a `1 - alpha` confidence interval and the Wald p-value
    #[must_use]
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Enables or disables the exclusion of weak instruments
    #[must_use]
    pub fn instrument_prune(mut self, prune: bool) -> Self {
        self.instrument_prune = prune;
        self
    }

    /// Sets the prefix of the model terms that are used as instruments
    #[must_use]
    pub fn instrument_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.instrument_prefix = prefix.into();
        self
    }

    /// Estimates the causal effect of the exposure on the outcome
    ///
    /// Instruments must be present in both model fits, all others are ignored.
    ///
    /// # Errors
    ///
    /// - [`StatsError::InvalidAlpha`] if alpha is not within `(0, 1)`
    /// - [`StatsError::NoUsableInstruments`] if no instrument is left after
    ///   joining both model fits and pruning weak instruments
    pub fn estimate(&self, exposure: &ModelFit, outcome: &ModelFit) -> StatsResult<MrResult> {
        if let Some(alpha) = self.alpha {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(StatsError::InvalidAlpha(alpha));
            }
        }

        let prefix = self.instrument_prefix.as_str();
        let outcome_effects: HashMap<&str, Effect> = outcome.instruments(prefix).collect();

        let mut summary_stats: SmallVec<[InstrumentSummary; DEFAULT_NUM_INSTRUMENTS]> =
            SmallVec::new();
        let mut numerator = 0.0;
        let mut denominator = 0.0;

        for (term, exp) in exposure.instruments(prefix) {
            let Some(out) = outcome_effects.get(term) else {
                trace!("Instrument {} is missing in the outcome model", term);
                continue;
            };

            let pruned = self.instrument_prune && exp.chi2() < CHI2_1DF_CRITICAL_05;
            let weight = if pruned {
                debug!("Pruning weak instrument {} (chi2 = {})", term, exp.chi2());
                None
            } else {
                let weight = out.se.powi(-2);
                numerator += exp.beta * out.beta * weight;
                denominator += exp.beta.powi(2) * weight;
                Some(weight)
            };

            summary_stats.push(InstrumentSummary {
                term: term.to_string(),
                exposure_beta: exp.beta,
                exposure_se: exp.se,
                outcome_beta: out.beta,
                outcome_se: out.se,
                pruned,
                weight,
            });
        }

        if summary_stats.iter().all(|s| s.pruned) {
            return Err(StatsError::NoUsableInstruments);
        }

        let ivw_beta = numerator / denominator;
        let ivw_se = (1.0 / denominator).sqrt();
        debug!(
            "IVW estimate from {} instruments: {} ({})",
            summary_stats.len(),
            ivw_beta,
            ivw_se
        );

        let (ci, wald_p) = match self.alpha {
            Some(alpha) => {
                let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are valid");
                // z is negative, so `lower` adds it
                let z = normal.inverse_cdf(alpha / 2.0);
                let ci = ConfidenceInterval {
                    lower: ivw_beta + z * ivw_se,
                    upper: ivw_beta - z * ivw_se,
                    alpha,
                };
                let wald_p = 2.0 * normal.cdf(-(ivw_beta / ivw_se).abs());
                (Some(ci), Some(wald_p))
            }
            None => (None, None),
        };

        Ok(MrResult {
            ivw_beta,
            ivw_se,
            ci,
            wald_p,
            summary_stats,
        })
    }
}

/// Estimates the causal effect with the one-sample IVW estimator
///
/// Shortcut for [`OneSampleIvw`] with the default instrument prefix.
///
/// # Errors
///
/// See [`OneSampleIvw::estimate`]
pub fn ivw_mr(
    exposure: &ModelFit,
    outcome: &ModelFit,
    alpha: Option<f64>,
    instrument_prune: bool,
) -> StatsResult<MrResult> {
    let mut estimator = OneSampleIvw::new().instrument_prune(instrument_prune);
    estimator.alpha = alpha;
    estimator.estimate(exposure, outcome)
}
