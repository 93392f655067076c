//! Cubic smoothing spline with a fixed smoothing factor
//!
//! The fit follows the strategy of Dierckx' `curfit`:
//!
//! 1. Fit the least-squares cubic polynomial. If its residual sum of squares
//!    does not exceed the smoothing factor `s` by more than the tolerance,
//!    the polynomial is the solution.
//! 2. Otherwise insert interior knots at data points inside the intervals with
//!    the largest residuals until the least-squares spline satisfies `s`.
//! 3. Smooth the least-squares spline by penalizing the jumps of the third
//!    derivative at the interior knots. The penalty is chosen so that the
//!    residual sum of squares equals `s`.
//!
//! Outside of `[x[0], x[m-1]]` the spline is extrapolated with the polynomial
//! piece of the first or last knot interval.
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::{f64_from_usize, StatsError, StatsResult};

const DEGREE: usize = 3;
const ORDER: usize = DEGREE + 1;

/// The residual may differ from `s` by this fraction of `s`
const TOLERANCE: f64 = 0.001;

/// Maximum number of knot insertion rounds
const MAX_KNOT_ROUNDS: usize = 40;

/// Maximum number of bisection steps on the smoothing penalty
const MAX_PENALTY_STEPS: usize = 200;

/// The penalty weight is searched in `[10^-PENALTY_LOG10_RANGE, 10^PENALTY_LOG10_RANGE]`,
/// relative to the trace of the normal equations
const PENALTY_LOG10_RANGE: f64 = 8.0;

/// A cubic B-spline fitted to data points
///
/// # Examples
///
/// ```
/// use phewas_stats::qvalue::SmoothingSpline;
///
/// let x: Vec<f64> = (0..20).map(|i| f64::from(i) / 10.0).collect();
/// let y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x - x * x * x).collect();
///
/// let spline = SmoothingSpline::fit(&x, &y, 1.0).unwrap();
///
/// // a cubic polynomial is fitted exactly
/// assert!((spline.evaluate(0.55) - (1.0 + 1.1 - 0.55f64.powi(3))).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    residual: f64,
}

/// A knot interval and the data points strictly inside of it
#[derive(Debug)]
struct Interval {
    fp: f64,
    points: Range<usize>,
}

impl SmoothingSpline {
    /// Fits a cubic smoothing spline with smoothing factor `s`
    ///
    /// All data points have unit weight, `x` must be strictly increasing
    /// and contain at least 4 points.
    ///
    /// # Errors
    ///
    /// - [`StatsError::InvalidSplineInput`] if `x` and `y` differ in length,
    ///   contain fewer than 4 or non-finite values, or `x` is not increasing.
    /// - [`StatsError::SingularSystem`] if the normal equations cannot be solved
    pub fn fit(x: &[f64], y: &[f64], s: f64) -> StatsResult<Self> {
        validate(x, y, s)?;

        let m = x.len();
        let mut knots = boundary_knots(x[0], x[m - 1]);

        let acc = TOLERANCE * s;
        let polynomial = Self::least_squares(x, y, knots.clone())?;
        let fp0 = polynomial.residual;
        if fp0 - s < acc {
            debug!("Polynomial fit: fp0 = {fp0}, s = {s}");
            return Ok(polynomial);
        }

        let max_knots = m + ORDER;
        let mut spline = polynomial;
        let mut fp_old = fp0;
        let mut nplus = 1usize;

        for round in 0..MAX_KNOT_ROUNDS {
            if spline.residual <= s || knots.len() >= max_knots {
                break;
            }
            if round > 0 {
                let mut npl1 = nplus * 2;
                if fp_old - spline.residual > acc {
                    let ratio = (spline.residual - s) / (fp_old - spline.residual);
                    npl1 = usize_from_f64(ratio * f64_from_usize(nplus));
                }
                nplus = (nplus * 2).min(npl1.max(nplus / 2).max(1));
            }
            fp_old = spline.residual;

            let mut intervals = spline.intervals(x, y);
            let mut inserted = 0;
            while inserted < nplus && knots.len() < max_knots {
                match insert_knot(&mut knots, &mut intervals, x) {
                    Some(knot) => trace!("Adding knot at {knot}"),
                    None => break,
                }
                inserted += 1;
            }
            if inserted == 0 {
                debug!("No interval left to insert a knot");
                break;
            }

            spline = Self::least_squares(x, y, knots.clone())?;
            debug!(
                "Least squares spline with {} knots: fp = {}",
                knots.len(),
                spline.residual
            );
            if (spline.residual - s).abs() < acc {
                return Ok(spline);
            }
        }

        if spline.residual > s || spline.interior_knots() == 0 {
            return Ok(spline);
        }

        Self::smooth(x, y, knots, s, acc)
    }

    /// Evaluates the spline at `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        let l = interval_index(&self.knots, x);
        basis(&self.knots, l, x)
            .iter()
            .enumerate()
            .map(|(i, b)| b * self.coefficients[l - DEGREE + i])
            .sum()
    }

    /// The sum of squared residuals at the fitted data points
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// The full knot vector, including the 4-fold boundary knots
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// The B-spline coefficients
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    fn interior_knots(&self) -> usize {
        self.knots.len() - 2 * ORDER
    }

    /// Least-squares spline for a fixed set of knots
    fn least_squares(x: &[f64], y: &[f64], knots: Vec<f64>) -> StatsResult<Self> {
        Self::penalized(x, y, knots, 0.0)
    }

    /// Least-squares spline with a penalty on the discontinuities of the
    /// third derivative
    fn penalized(x: &[f64], y: &[f64], knots: Vec<f64>, penalty: f64) -> StatsResult<Self> {
        let ncoef = knots.len() - ORDER;
        let mut normal = DMatrix::<f64>::zeros(ncoef, ncoef);
        let mut rhs = DVector::<f64>::zeros(ncoef);

        for (xi, yi) in x.iter().zip(y) {
            let l = interval_index(&knots, *xi);
            let b = basis(&knots, l, *xi);
            let offset = l - DEGREE;
            for i in 0..ORDER {
                rhs[offset + i] += b[i] * yi;
                for j in 0..ORDER {
                    normal[(offset + i, offset + j)] += b[i] * b[j];
                }
            }
        }

        if penalty > 0.0 {
            let jumps = discontinuity_jumps(&knots);
            let jtj = jumps.transpose() * &jumps;
            let scale = normal.trace() / jtj.trace();
            normal += jtj * (penalty * scale);
        }

        let solution = match normal.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => normal.lu().solve(&rhs).ok_or(StatsError::SingularSystem)?,
        };

        let mut spline = Self {
            knots,
            coefficients: solution.iter().copied().collect(),
            residual: 0.0,
        };
        spline.residual = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| (yi - spline.evaluate(*xi)).powi(2))
            .sum();
        Ok(spline)
    }

    /// Finds the penalty for which the residual matches `s`
    ///
    /// The residual increases monotonically with the penalty, from the
    /// least-squares spline (below `s`) towards the polynomial (above `s`).
    fn smooth(x: &[f64], y: &[f64], knots: Vec<f64>, s: f64, acc: f64) -> StatsResult<Self> {
        let mut lo = -PENALTY_LOG10_RANGE;
        let mut hi = PENALTY_LOG10_RANGE;
        let mut best = Self::penalized(x, y, knots.clone(), 10f64.powf(hi))?;
        if best.residual <= s {
            return Ok(best);
        }

        for _ in 0..MAX_PENALTY_STEPS {
            let mid = (lo + hi) / 2.0;
            let candidate = Self::penalized(x, y, knots.clone(), 10f64.powf(mid))?;
            trace!("penalty 1e{mid}: fp = {}", candidate.residual);
            if candidate.residual > s {
                hi = mid;
            } else {
                lo = mid;
            }
            let done = (candidate.residual - s).abs() <= acc;
            best = candidate;
            if done {
                break;
            }
        }
        debug!("Smoothing spline: fp = {}, s = {s}", best.residual);
        Ok(best)
    }

    /// Squared residuals per knot interval, with the data points inside
    ///
    /// Data points located on an interior knot contribute half of
    /// their residual to each neighbouring interval.
    fn intervals(&self, x: &[f64], y: &[f64]) -> Vec<Interval> {
        let inner = &self.knots[DEGREE..self.knots.len() - DEGREE];
        let mut intervals: Vec<Interval> = inner
            .windows(2)
            .map(|w| {
                let start = x.partition_point(|v| *v <= w[0]);
                let end = x.partition_point(|v| *v < w[1]).max(start);
                Interval {
                    fp: 0.0,
                    points: start..end,
                }
            })
            .collect();

        for (xi, yi) in x.iter().zip(y) {
            let residual = (yi - self.evaluate(*xi)).powi(2);
            let idx = interval_index(&self.knots, *xi) - DEGREE;
            if idx > 0 && *xi == self.knots[idx + DEGREE] {
                intervals[idx - 1].fp += residual / 2.0;
                intervals[idx].fp += residual / 2.0;
            } else {
                intervals[idx].fp += residual;
            }
        }
        intervals
    }
}

fn validate(x: &[f64], y: &[f64], s: f64) -> StatsResult<()> {
    if x.len() != y.len() {
        return Err(StatsError::InvalidSplineInput(format!(
            "x and y differ in length: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < ORDER {
        return Err(StatsError::InvalidSplineInput(format!(
            "at least {ORDER} data points are required"
        )));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(StatsError::InvalidSplineInput(
            "non-finite data point".to_string(),
        ));
    }
    if x.windows(2).any(|w| w[0] >= w[1]) {
        return Err(StatsError::InvalidSplineInput(
            "x must be strictly increasing".to_string(),
        ));
    }
    if !(s >= 0.0) {
        return Err(StatsError::InvalidSplineInput(format!(
            "invalid smoothing factor {s}"
        )));
    }
    Ok(())
}

fn boundary_knots(xb: f64, xe: f64) -> Vec<f64> {
    let mut knots = vec![xb; ORDER];
    knots.extend([xe; ORDER]);
    knots
}

/// Splits the interval with the largest residual at its middle data point
///
/// On ties the first interval is split. The residual of the split interval
/// is shared in proportion to the data points left on either side.
/// Returns the new knot or `None` if no interval with data points has a
/// positive residual.
fn insert_knot(knots: &mut Vec<f64>, intervals: &mut Vec<Interval>, x: &[f64]) -> Option<f64> {
    let (idx, fp) = intervals
        .iter()
        .enumerate()
        .filter(|(_, interval)| !interval.points.is_empty())
        .fold(None, |max: Option<(usize, f64)>, (idx, interval)| match max {
            Some((_, fpmax)) if fpmax >= interval.fp => max,
            _ if interval.fp > 0.0 => Some((idx, interval.fp)),
            _ => max,
        })?;

    let points = intervals[idx].points.clone();
    let npoints = f64_from_usize(points.len());
    let half = points.len() / 2 + 1;
    let split = points.start + half - 1;
    let knot = x[split];

    intervals[idx] = Interval {
        fp: fp * f64_from_usize(half - 1) / npoints,
        points: points.start..split,
    };
    intervals.insert(
        idx + 1,
        Interval {
            fp: fp * f64_from_usize(points.len() - half) / npoints,
            points: split + 1..points.end,
        },
    );
    knots.insert(idx + ORDER, knot);
    Some(knot)
}

/// Truncates a positive ratio of knot counts
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn usize_from_f64(n: f64) -> usize {
    n as usize
}

/// Index `l` of the knot interval `[t[l], t[l+1])` used to evaluate at `x`
///
/// Values outside of the boundary knots use the first or last interval.
fn interval_index(knots: &[f64], x: f64) -> usize {
    let last = knots.len() - ORDER - 1;
    knots
        .partition_point(|t| *t <= x)
        .saturating_sub(1)
        .clamp(DEGREE, last)
}

/// The 4 non-zero cubic B-splines `B[l-3]..=B[l]` at `x`
///
/// Cox-de Boor recursion, which also evaluates the polynomial
/// pieces outside of interval `l`.
fn basis(knots: &[f64], l: usize, x: f64) -> [f64; ORDER] {
    let mut h = [0.0; ORDER];
    let mut hh = [0.0; ORDER];
    h[0] = 1.0;
    for j in 1..=DEGREE {
        hh[..j].copy_from_slice(&h[..j]);
        h[0] = 0.0;
        for i in 1..=j {
            let li = l + i;
            let lj = li - j;
            let f = hh[i - 1] / (knots[li] - knots[lj]);
            h[i - 1] += f * (knots[li] - x);
            h[i] = f * (x - knots[lj]);
        }
    }
    h
}

/// Jumps of the third derivative of every B-spline at the interior knots
///
/// Row `r` holds the discontinuities at knot `t[r + 4]`, scaled by the mean
/// interval width so that the penalty does not depend on the range of `x`.
fn discontinuity_jumps(knots: &[f64]) -> DMatrix<f64> {
    let ncoef = knots.len() - ORDER;
    let rows = ncoef - ORDER;
    let fac = f64_from_usize(ncoef - DEGREE) / (knots[ncoef] - knots[DEGREE]);
    let mut jumps = DMatrix::<f64>::zeros(rows, ncoef);

    for l in ORDER..ncoef {
        let r = l - ORDER;
        let mut h = [0.0; 2 * ORDER];
        for j in 0..ORDER {
            h[j] = knots[l] - knots[l + j - ORDER];
            h[j + ORDER] = knots[l] - knots[l + j + 1];
        }
        for j in 0..=ORDER {
            let prod = (1..=DEGREE).fold(h[j], |prod, i| prod * h[j + i] * fac);
            let lp = r + j;
            jumps[(r, lp)] = (knots[lp + ORDER] - knots[lp]) / prod;
        }
    }
    jumps
}
