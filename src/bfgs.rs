//! Implementation of the BFGS quasi-Newton method.
//!
//! The inverse Hessian approximation starts as the identity and is only changed
//! by the rank-2 BFGS correction after every line search. Each step consumes the
//! previous `BfgsState` and produces a fresh one.

use crate::lin::{from_usize, identity, mat_vec, outer, to_f64, Lin, Rn};
use crate::line_search::{LineSearch, LineSearchError};
use log::{debug, trace, warn};
use ndarray::Array2;
use num_traits::Float;
use thiserror::Error;

/// Implementation of the BFGS quasi-Newton method.
#[derive(Debug, Clone)]
pub struct Bfgs<S: Float> {
    /// Converged once no coordinate moved by more than `ptol` (relative to
    /// `max(|x_i|, 1)`) in the last step
    pub ptol: S,
    /// Converged once `max_i |g_i| max(|x_i|, 1) / max(|f|, 1)` is below `gtol`
    pub gtol: S,
    /// Maximum number of iterations to take
    pub max_iter: i32,
    /// Maximum line search step is `stpmax_scale * max(|x0|, n)`
    pub stpmax_scale: S,
    /// Parameters of the backtracking line search
    pub line_method: LineSearch<S>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BfgsError {
    #[error("cannot minimize over a zero-dimensional space")]
    EmptyPoint,
    #[error("gradient has dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("objective or gradient is not finite at the start point")]
    NonFiniteValue,
    /// The curvature pair cannot be used for the rank-2 update.
    #[error("degenerate BFGS update: dx.dg = {dx_dg}, dg.H.dg = {dg_h_dg}")]
    DegenerateUpdate { dx_dg: f64, dg_h_dg: f64 },
    #[error("line search failed: {0}")]
    LineSearch(#[from] LineSearchError),
    #[error("maximum iterations exceeded ({0})")]
    MaxIterReached(i32),
}

/// Iteration state of the BFGS method.
#[derive(Debug, Clone, PartialEq)]
pub struct BfgsState<F> {
    pub point: Rn<F>,
    pub value: F,
    pub gradient: Rn<F>,
    /// Next search direction `-H g`
    pub direction: Rn<F>,
    /// Approximate inverse Hessian
    pub inv_hessian: Array2<F>,
    /// Maximum line search step length
    pub stpmax: F,
    /// `x' - x` of the step that produced this state; `None` for the start state
    pub displacement: Option<Rn<F>>,
}

/// Information about a performed iteration of the BFGS method
#[derive(Debug, Clone)]
pub struct BfgsIteration<S> {
    /// Iteration number (indexed from 0)
    pub k: i32,
    /// Function value at the end of the iteration
    pub value: S,
    /// Gradient norm at the end of the iteration
    pub grad_norm: S,
    /// Line search result
    pub lambda: S,
    /// Number of function evaluations by the line search
    pub line_eval_count: i32,
    /// The line search could not decrease the function
    pub stalled: bool,
}

/// Successful result of the BFGS method.
#[derive(Debug, Clone, PartialEq)]
pub struct BfgsMinimum<F> {
    pub point: Rn<F>,
    pub value: F,
    pub gradient: Rn<F>,
    pub inv_hessian: Array2<F>,
    /// Number of iterations taken
    pub iterations: i32,
}

impl<F> From<(BfgsState<F>, i32)> for BfgsMinimum<F> {
    fn from((state, iterations): (BfgsState<F>, i32)) -> Self {
        BfgsMinimum {
            point: state.point,
            value: state.value,
            gradient: state.gradient,
            inv_hessian: state.inv_hessian,
            iterations,
        }
    }
}

impl Bfgs<f32> {
    /// Defaults for `f32` type
    pub fn new() -> Self {
        Bfgs {
            ptol: 1e-5,
            gtol: 1e-5,
            max_iter: 200,
            stpmax_scale: 100.,
            line_method: Default::default(),
        }
    }
}

impl Bfgs<f64> {
    /// Defaults for `f64` type
    pub fn new() -> Self {
        Bfgs {
            ptol: 1e-7,
            gtol: 1e-7,
            max_iter: 200,
            stpmax_scale: 100.,
            line_method: Default::default(),
        }
    }
}

impl Default for Bfgs<f32> {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Bfgs<f64> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_dim<F>(expected: usize, g: &Rn<F>) -> Result<(), BfgsError> {
    if g.len() == expected {
        Ok(())
    } else {
        Err(BfgsError::DimensionMismatch {
            expected,
            found: g.len(),
        })
    }
}

impl<S: Float> Bfgs<S> {
    /// Start state at `x0`: steepest descent direction and identity inverse Hessian.
    pub fn init<Func, Grad>(&self, x0: &Rn<S>, mut f: Func, mut grad: Grad) -> Result<BfgsState<S>, BfgsError>
    where
        Func: FnMut(&Rn<S>) -> S,
        Grad: FnMut(&Rn<S>) -> Rn<S>,
    {
        let n = x0.len();
        if n == 0 {
            return Err(BfgsError::EmptyPoint);
        }
        let value = f(x0);
        let gradient = grad(x0);
        check_dim(n, &gradient)?;
        if !value.is_finite() || !gradient.is_finite() {
            return Err(BfgsError::NonFiniteValue);
        }

        Ok(BfgsState {
            point: x0.clone(),
            value,
            direction: -gradient.clone(),
            gradient,
            inv_hessian: identity(n),
            stpmax: self.stpmax_scale * x0.norm().max(from_usize(n)),
            displacement: None,
        })
    }

    /// Performs one line search and the rank-2 update of the inverse Hessian.
    ///
    /// If the line search stalls, the returned state has the same point and a zero
    /// displacement, which `converged` accepts.
    pub fn step<Func, Grad>(
        &self,
        state: &BfgsState<S>,
        f: Func,
        grad: Grad,
    ) -> Result<BfgsState<S>, BfgsError>
    where
        Func: FnMut(&Rn<S>) -> S,
        Grad: FnMut(&Rn<S>) -> Rn<S>,
    {
        self.step_with_info(state, f, grad).map(|(s, _)| s)
    }

    fn step_with_info<Func, Grad>(
        &self,
        state: &BfgsState<S>,
        f: Func,
        mut grad: Grad,
    ) -> Result<(BfgsState<S>, (S, i32, bool)), BfgsError>
    where
        Func: FnMut(&Rn<S>) -> S,
        Grad: FnMut(&Rn<S>) -> Rn<S>,
    {
        let ls = self.line_method.search(
            f,
            &state.point,
            state.value,
            &state.gradient,
            &state.direction,
            state.stpmax,
        )?;
        let info = (ls.lambda, ls.evals, ls.stalled);

        if ls.stalled {
            let next = BfgsState {
                displacement: Some(state.point.origin()),
                ..state.clone()
            };
            return Ok((next, info));
        }

        let gradient = grad(&ls.point);
        check_dim(state.point.len(), &gradient)?;

        let dx = ls.point.clone() - state.point.clone();
        let dg = gradient.clone() - state.gradient.clone();
        let h_dg = mat_vec(&state.inv_hessian, &dg);
        let dx_dg = dx.dot(&dg);
        let dg_h_dg = dg.dot(&h_dg);

        // curvature condition, with roundoff margin
        let margin = (S::epsilon() * dx.norm_squared() * dg.norm_squared()).sqrt();
        if !(dx_dg > margin) || !(dg_h_dg > S::zero()) || !dx_dg.is_finite() || !dg_h_dg.is_finite() {
            warn!(
                "degenerate BFGS update: dx.dg = {}, dg.H.dg = {}",
                to_f64(dx_dg),
                to_f64(dg_h_dg)
            );
            return Err(BfgsError::DegenerateUpdate {
                dx_dg: to_f64(dx_dg),
                dg_h_dg: to_f64(dg_h_dg),
            });
        }

        // u = dx / (dx.dg) - H dg / (dg.H.dg)
        let mut u = dx.clone();
        u.combine(S::one() / dx_dg, &h_dg, -S::one() / dg_h_dg);

        let inv_hessian = &state.inv_hessian
            + &outer(&dx, &dx).mapv(|v| v / dx_dg)
            - outer(&h_dg, &h_dg).mapv(|v| v / dg_h_dg)
            + outer(&u, &u).mapv(|v| v * dg_h_dg);

        let direction = -mat_vec(&inv_hessian, &gradient);

        Ok((
            BfgsState {
                point: ls.point,
                value: ls.value,
                gradient,
                direction,
                inv_hessian,
                stpmax: state.stpmax,
                displacement: Some(dx),
            },
            info,
        ))
    }

    /// Point and gradient convergence tests.
    ///
    /// The point test needs a displacement, so it never holds for a start state.
    pub fn converged(&self, state: &BfgsState<S>) -> bool {
        let one = S::one();
        let scaled_max = |v: &Rn<S>, scale: &dyn Fn(S) -> S| {
            v.iter()
                .zip(state.point.iter())
                .fold(S::zero(), |m, (&vi, &xi)| m.max(vi.abs() * scale(xi.abs().max(one))))
        };

        if let Some(dx) = &state.displacement {
            if scaled_max(dx, &|s| one / s) < self.ptol {
                return true;
            }
        }
        let den = state.value.abs().max(one);
        scaled_max(&state.gradient, &|s| s) / den < self.gtol
    }

    /// Minimize `f` with the gradient `grad`, starting at `x0`.
    ///
    /// Returns the minimizer and the final inverse Hessian approximation, or
    /// `MaxIterReached` if the tolerances are not met within `max_iter` steps.
    pub fn minimize<Func, Grad>(&self, x0: &Rn<S>, f: Func, grad: Grad) -> Result<BfgsMinimum<S>, BfgsError>
    where
        Func: FnMut(&Rn<S>) -> S,
        Grad: FnMut(&Rn<S>) -> Rn<S>,
    {
        self.minimize_with_trace(x0, f, grad, |_, _| {})
    }

    /// The same as `minimize`, but allows to pass in a callback function that
    /// is called after every iteration.
    /// It is provided with the new state after the iteration is finished,
    /// and with additional information about the performed iteration.
    pub fn minimize_with_trace<Func, Grad, Callback>(
        &self,
        x0: &Rn<S>,
        mut f: Func,
        mut grad: Grad,
        mut callback: Callback,
    ) -> Result<BfgsMinimum<S>, BfgsError>
    where
        Func: FnMut(&Rn<S>) -> S,
        Grad: FnMut(&Rn<S>) -> Rn<S>,
        Callback: FnMut(&BfgsState<S>, BfgsIteration<S>),
    {
        let mut state = self.init(x0, &mut f, &mut grad)?;
        if self.converged(&state) {
            debug!("BFGS start point is already stationary");
            return Ok((state, 0).into());
        }

        for k in 0..self.max_iter {
            let (next, (lambda, line_eval_count, stalled)) =
                self.step_with_info(&state, &mut f, &mut grad)?;
            state = next;

            trace!(
                "BFGS iteration {}: f = {}, step {}, {} evaluations",
                k,
                to_f64(state.value),
                to_f64(lambda),
                line_eval_count
            );
            callback(
                &state,
                BfgsIteration {
                    k,
                    value: state.value,
                    grad_norm: state.gradient.norm(),
                    lambda,
                    line_eval_count,
                    stalled,
                },
            );

            if self.converged(&state) {
                debug!(
                    "BFGS converged after {} iterations: f = {}",
                    k + 1,
                    to_f64(state.value)
                );
                return Ok((state, k + 1).into());
            }
        }

        warn!("BFGS did not converge in {} iterations", self.max_iter);
        Err(BfgsError::MaxIterReached(self.max_iter))
    }
}
