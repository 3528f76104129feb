//! Backtracking line search with quadratic and cubic step refinement.
//!
//! Starting from the full step `λ = 1` along `p`, the step is shortened until the
//! sufficient decrease (Armijo) condition
//!
//! `f(x + λp) <= f(x) + α λ ∇f(x)·p`
//!
//! holds. The first refinement minimizes the quadratic through `f(x)`, the slope
//! and the first trial; later ones minimize the cubic through the two most
//! recent trials.

use crate::lin::{to_f64, Lin, Rn};
use log::debug;
use num_traits::Float;
use thiserror::Error;

/// Backtracking line search parameters.
#[derive(Debug, Clone)]
pub struct LineSearch<S: Float> {
    /// Relative point tolerance: steps shorter than this (relative to the
    /// magnitude of `x`) are not attempted
    pub ptol: S,
    /// `alpha` for the sufficient decrease condition
    pub alpha: S,
    /// Lower bound of the next step as a fraction of the current one
    pub shrink_min: S,
    /// Upper bound of the next step as a fraction of the current one
    pub shrink_max: S,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineSearchError {
    /// The direction does not point downhill.
    #[error("not a descent direction (slope {slope})")]
    NotDescent { slope: f64 },
    /// Roundoff made the cubic step model meaningless.
    #[error("negative discriminant {disc} in cubic step model")]
    NegativeDiscriminant { disc: f64 },
    #[error("dimension mismatch: point {point}, gradient {gradient}, direction {direction}")]
    DimensionMismatch {
        point: usize,
        gradient: usize,
        direction: usize,
    },
}

/// Result of a line search.
#[derive(Debug, Clone, PartialEq)]
pub struct LineStep<S> {
    /// Accepted point, or the original point if the search stalled
    pub point: Rn<S>,
    /// Function value at `point`
    pub value: S,
    /// Accepted multiple of the (possibly shortened) direction
    pub lambda: S,
    /// Number of function evaluations
    pub evals: i32,
    /// The step became shorter than the point tolerance before sufficient
    /// decrease was reached; `point` is the original point.
    pub stalled: bool,
}

impl Default for LineSearch<f32> {
    fn default() -> Self {
        LineSearch {
            ptol: 1e-5,
            alpha: 1e-4,
            shrink_min: 0.1,
            shrink_max: 0.5,
        }
    }
}

impl Default for LineSearch<f64> {
    fn default() -> Self {
        LineSearch {
            ptol: 1e-7,
            alpha: 1e-4,
            shrink_min: 0.1,
            shrink_max: 0.5,
        }
    }
}

impl LineSearch<f32> {
    pub fn new() -> Self {
        Default::default()
    }
}

impl LineSearch<f64> {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<S: Float> LineSearch<S> {
    /// Search along `p` from `x`.
    ///
    ///   - `fx` and `g` are the value and gradient of `f` at `x`.
    ///   - `p` is shortened to length `stpmax` if it is longer.
    ///   - `g·p` must be negative.
    pub fn search<Func>(
        &self,
        mut f: Func,
        x: &Rn<S>,
        fx: S,
        g: &Rn<S>,
        p: &Rn<S>,
        stpmax: S,
    ) -> Result<LineStep<S>, LineSearchError>
    where
        Func: FnMut(&Rn<S>) -> S,
    {
        if x.len() != g.len() || x.len() != p.len() {
            return Err(LineSearchError::DimensionMismatch {
                point: x.len(),
                gradient: g.len(),
                direction: p.len(),
            });
        }

        let mut p = p.clone();
        let len = p.norm();
        if len > stpmax {
            p.scale(stpmax / len);
        }

        let slope = g.dot(&p);
        if !(slope < S::zero()) {
            return Err(LineSearchError::NotDescent {
                slope: to_f64(slope),
            });
        }

        // largest coordinate step relative to the point
        let test = p
            .iter()
            .zip(x.iter())
            .fold(S::zero(), |m, (&pi, &xi)| m.max(pi.abs() / xi.abs().max(S::one())));
        let lambda_min = self.ptol / test;

        let mut lambda = S::one();
        // previous trial `(λ, f)` for the cubic model
        let mut prev: Option<(S, S)> = None;
        let mut evals = 0;

        loop {
            let mut x_new = x.clone();
            x_new.ray_to(&p, lambda);
            let f_new = f(&x_new);
            evals += 1;

            if lambda < lambda_min {
                debug!(
                    "line search stalled: step {} below {}",
                    to_f64(lambda),
                    to_f64(lambda_min)
                );
                return Ok(LineStep {
                    point: x.clone(),
                    value: fx,
                    lambda: S::zero(),
                    evals,
                    stalled: true,
                });
            }
            if f_new <= fx + self.alpha * lambda * slope {
                return Ok(LineStep {
                    point: x_new,
                    value: f_new,
                    lambda,
                    evals,
                    stalled: false,
                });
            }

            let next = match prev {
                None => quadratic_step(lambda, f_new, fx, slope),
                Some((lambda2, f2)) => cubic_step(lambda, f_new, lambda2, f2, fx, slope)?,
            };

            prev = Some((lambda, f_new));
            // NaN proposals fall to the lower bound
            lambda = next
                .max(self.shrink_min * lambda)
                .min(self.shrink_max * lambda);
        }
    }
}

// Minimizer of the quadratic through `(0, fx)` with slope `slope` and `(lambda, f)`.
fn quadratic_step<S: Float>(lambda: S, f: S, fx: S, slope: S) -> S {
    let two = S::one() + S::one();
    -slope * lambda * lambda / (two * (f - fx - slope * lambda))
}

// Minimizer of the cubic through `(0, fx)` with slope `slope` and the two
// trials `(lambda, f)` and `(lambda2, f2)`.
fn cubic_step<S: Float>(
    lambda: S,
    f: S,
    lambda2: S,
    f2: S,
    fx: S,
    slope: S,
) -> Result<S, LineSearchError> {
    let two = S::one() + S::one();
    let three = two + S::one();

    let rhs1 = f - fx - lambda * slope;
    let rhs2 = f2 - fx - lambda2 * slope;
    let a = (rhs1 / (lambda * lambda) - rhs2 / (lambda2 * lambda2)) / (lambda - lambda2);
    let b = (-lambda2 * rhs1 / (lambda * lambda) + lambda * rhs2 / (lambda2 * lambda2))
        / (lambda - lambda2);

    if a == S::zero() {
        return Ok(-slope / (two * b));
    }
    let disc = b * b - three * a * slope;
    if disc < S::zero() {
        return Err(LineSearchError::NegativeDiscriminant {
            disc: to_f64(disc),
        });
    }
    Ok(if b <= S::zero() {
        (-b + disc.sqrt()) / (three * a)
    } else {
        -slope / (b + disc.sqrt())
    })
}
