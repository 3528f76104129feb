//! Unconstrained minimization over `Rⁿ`: the Nelder-Mead simplex method with a
//! finite-difference Hessian estimate at the converged simplex, and the BFGS
//! quasi-Newton method with a quadratic/cubic backtracking line search.

mod bfgs;
mod hessian;
mod lin;
mod line_search;
mod simplex;

pub use bfgs::{Bfgs, BfgsError, BfgsIteration, BfgsMinimum, BfgsState};
pub use hessian::{estimate_hessian, HessianError, HessianEstimate};
pub use lin::{identity, invert, mat_vec, outer, quad_form, Lin, Rn};
pub use line_search::{LineSearch, LineSearchError, LineStep};
pub use simplex::{centroid, NelderMead, Simplex, SimplexError, SimplexIteration, SimplexStep, Vertex};
