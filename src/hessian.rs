//! Finite-difference curvature estimate around a converged simplex.
//!
//! The estimate is centred at the per-coordinate mean of the vertices and uses
//! the per-coordinate spread of the simplex as the difference step, so the
//! result is only as good as the local quadratic approximation of the objective
//! on the scale of the simplex. Its inverse is the covariance of a Laplace
//! approximation around the optimum.

use crate::lin::{from_usize, invert, to_f64, Lin, Rn};
use crate::simplex::Simplex;
use log::warn;
use ndarray::Array2;
use num_traits::Float;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HessianError {
    /// All vertices share the same coordinate, so there is no step to difference with.
    #[error("simplex has no spread along dimension {dim}")]
    ZeroSpread { dim: usize },
    #[error("curvature entry ({row}, {col}) is not finite")]
    NonFinite { row: usize, col: usize },
    #[error("curvature matrix is singular")]
    Singular,
}

/// Curvature matrix and its inverse at `center`.
#[derive(Debug, Clone, PartialEq)]
pub struct HessianEstimate<F> {
    /// Per-coordinate mean of the simplex vertices
    pub center: Rn<F>,
    /// Per-coordinate difference steps
    pub steps: Rn<F>,
    pub hessian: Array2<F>,
    pub inverse: Array2<F>,
}

impl<F: Float> HessianEstimate<F> {
    /// Square roots of the diagonal of the inverse.
    ///
    /// `None` if the inverse has a nonpositive diagonal entry, which happens
    /// when the curvature is not positive definite.
    pub fn standard_errors(&self) -> Option<Rn<F>> {
        let diag = self.inverse.diag();
        if diag.iter().any(|&v| !(v > F::zero())) {
            return None;
        }
        Some(Rn::from_array(diag.mapv(|v| v.sqrt())))
    }
}

/// Estimate the Hessian of `f` around a (converged) simplex.
///
/// Entry `(i, j)` is the four-point central difference
///
/// `(f(x+uᵢ+uⱼ) - f(x+uᵢ-uⱼ) - f(x-uᵢ+uⱼ) + f(x-uᵢ-uⱼ)) / (4 sᵢ sⱼ)`
///
/// where `x` is the vertex mean, `sᵢ = max(max - mean, mean - min)` of coordinate
/// `i` over the vertices and `uᵢ = sᵢ eᵢ`.
pub fn estimate_hessian<F, Func>(
    mut f: Func,
    simplex: &Simplex<F>,
) -> Result<HessianEstimate<F>, HessianError>
where
    F: Float,
    Func: FnMut(&Rn<F>) -> F,
{
    let n = simplex.dim();
    let vertices = simplex.vertices();
    let k = F::one() / from_usize(vertices.len());

    let mut center = Rn::zeros(n);
    let mut steps = Rn::zeros(n);
    for d in 0..n {
        let mut sum = F::zero();
        let mut lo = F::infinity();
        let mut hi = F::neg_infinity();
        for v in vertices {
            let x = v.point[d];
            sum = sum + x;
            lo = lo.min(x);
            hi = hi.max(x);
        }
        let mean = sum * k;
        let swing = (hi - mean).max(mean - lo);
        if !(swing > F::zero()) || !swing.is_finite() {
            return Err(HessianError::ZeroSpread { dim: d });
        }
        center[d] = mean;
        steps[d] = swing;
    }

    let axes: Vec<Rn<F>> = (0..n).map(|d| Rn::axis(n, d, steps[d])).collect();
    let four = F::one() + F::one() + F::one() + F::one();

    let mut eval = |si: F, i: usize, sj: F, j: usize| {
        let mut x = center.clone();
        x.ray_to(&axes[i], si).ray_to(&axes[j], sj);
        f(&x)
    };

    let (p, m) = (F::one(), -F::one());
    let mut hessian = Array2::zeros((n, n));
    for i in 0..n {
        for j in i..n {
            let h = (eval(p, i, p, j) - eval(p, i, m, j) - eval(m, i, p, j) + eval(m, i, m, j))
                / (four * steps[i] * steps[j]);
            if !h.is_finite() {
                return Err(HessianError::NonFinite { row: i, col: j });
            }
            hessian[(i, j)] = h;
            hessian[(j, i)] = h;
        }
    }

    let inverse = match invert(&hessian) {
        Some(inv) => inv,
        None => {
            warn!(
                "singular curvature estimate at {:?}",
                center.iter().map(|&x| to_f64(x)).collect::<Vec<_>>()
            );
            return Err(HessianError::Singular);
        }
    };

    Ok(HessianEstimate {
        center,
        steps,
        hessian,
        inverse,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lin::quad_form;
    use crate::simplex::{NelderMead, Vertex};
    use ndarray::array;

    fn close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) -> bool {
        a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }

    #[test]
    fn quadratic_form_at_converged_simplex() {
        let a = array![[2., 0.5], [0.5, 1.]];
        let f = |x: &Rn<f64>| quad_form(&a, x);

        let m = NelderMead::<f64>::new();
        let s0 = Simplex::initial(f, 0.1, &Rn::new(vec![1., 2.])).unwrap();
        let s = m.minimize(s0, f).unwrap();

        let est = estimate_hessian(f, &s).unwrap();
        let two_a = &a * 2.;
        assert!(close(&est.hessian, &two_a, 1e-4));
        // (2A)⁻¹ = [[1, -0.5], [-0.5, 2]] / 3.5
        let inv = array![[1. / 3.5, -0.5 / 3.5], [-0.5 / 3.5, 2. / 3.5]];
        assert!(close(&est.inverse, &inv, 1e-4));

        let se = est.standard_errors().unwrap();
        assert!((se[0] - (1. / 3.5f64).sqrt()).abs() < 1e-4);
        assert!((se[1] - (2. / 3.5f64).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn exact_for_quadratics_with_large_steps() {
        // central differences have no truncation error on quadratics
        let f = |x: &Rn<f64>| 3. * x[0] * x[0] + x[0] * x[1] + 0.5 * x[1] * x[1] + x[0];
        let s = Simplex::from_vertices(vec![
            Vertex { point: Rn::new(vec![1., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![2., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![1., 3.]), value: 0. },
        ])
        .unwrap();
        let est = estimate_hessian(f, &s).unwrap();
        assert!((est.center[0] - 4. / 3.).abs() < 1e-12);
        assert!((est.center[1] - 5. / 3.).abs() < 1e-12);
        assert!((est.steps[0] - 2. / 3.).abs() < 1e-12);
        assert!((est.steps[1] - 4. / 3.).abs() < 1e-12);
        assert!(close(&est.hessian, &array![[6., 1.], [1., 1.]], 1e-9));
    }

    #[test]
    fn badly_scaled_curvature() {
        // curvatures 14 orders of magnitude apart are still invertible
        let f = |x: &Rn<f64>| 1e12 * x[0] * x[0] + 1e-4 * x[1] * x[1];
        let s = Simplex::from_vertices(vec![
            Vertex { point: Rn::new(vec![1e-6, 1.]), value: 0. },
            Vertex { point: Rn::new(vec![2e-6, 1.]), value: 0. },
            Vertex { point: Rn::new(vec![1e-6, 3.]), value: 0. },
        ])
        .unwrap();
        let est = estimate_hessian(f, &s).unwrap();
        assert!((est.hessian[(0, 0)] / 2e12 - 1.).abs() < 1e-6);
        assert!((est.hessian[(1, 1)] / 2e-4 - 1.).abs() < 1e-6);
        assert!((est.inverse[(0, 0)] / 5e-13 - 1.).abs() < 1e-6);
        assert!((est.inverse[(1, 1)] / 5e3 - 1.).abs() < 1e-6);
    }

    #[test]
    fn zero_spread_is_reported() {
        let f = |x: &Rn<f64>| x[0] * x[0] + x[1] * x[1];
        let s = Simplex::from_vertices(vec![
            Vertex { point: Rn::new(vec![1., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![2., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![3., 1.]), value: 0. },
        ])
        .unwrap();
        assert_eq!(estimate_hessian(f, &s), Err(HessianError::ZeroSpread { dim: 1 }));
    }

    #[test]
    fn flat_direction_is_singular() {
        let f = |x: &Rn<f64>| (x[0] - 1.).powi(2);
        let s = Simplex::from_vertices(vec![
            Vertex { point: Rn::new(vec![1., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![2., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![1., 3.]), value: 0. },
        ])
        .unwrap();
        assert_eq!(estimate_hessian(f, &s), Err(HessianError::Singular));
    }

    #[test]
    fn saddle_has_no_standard_errors() {
        let f = |x: &Rn<f64>| x[0] * x[0] - x[1] * x[1];
        let s = Simplex::from_vertices(vec![
            Vertex { point: Rn::new(vec![1., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![2., 1.]), value: 0. },
            Vertex { point: Rn::new(vec![1., 3.]), value: 0. },
        ])
        .unwrap();
        let est = estimate_hessian(f, &s).unwrap();
        assert_eq!(est.standard_errors(), None);
    }
}
