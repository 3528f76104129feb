//! Implementation of the Nelder-Mead downhill simplex method.

use crate::lin::{from_usize, to_f64, Lin, Rn};
use log::{debug, trace, warn};
use num_traits::Float;
use std::cmp::Ordering;
use thiserror::Error;

/// Implementation of the Nelder-Mead downhill simplex method.
#[derive(Debug, Clone)]
pub struct NelderMead<S: Float> {
    /// Reflection coefficient
    pub alpha: S,
    /// Expansion coefficient
    pub gamma: S,
    /// Contraction coefficient
    pub rho: S,
    /// Shrink coefficient
    pub sigma: S,
    /// Stop once `worst value - best value` falls below this spread
    pub tol: S,
    /// Maximum number of iterations to take
    pub max_iter: i32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimplexError {
    #[error("cannot build a simplex around a zero-dimensional point")]
    EmptyPoint,
    #[error("vertex has dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("simplex of dimension {dim} needs {expected} vertices, got {found}")]
    WrongVertexCount {
        dim: usize,
        expected: usize,
        found: usize,
    },
    #[error("objective is not finite on the simplex (spread {spread})")]
    NonFiniteValue { spread: f64 },
    #[error("simplex did not converge in {0} iterations")]
    MaxIterReached(i32),
}

/// The transformation applied to the simplex in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplexStep {
    Reflect,
    Expand,
    Contract,
    Shrink,
}

/// Information about a performed iteration of the simplex method
#[derive(Debug, Clone)]
pub struct SimplexIteration<S> {
    /// Iteration number (indexed from 0)
    pub k: i32,
    /// Transformation that was applied
    pub step: SimplexStep,
    /// Best value after the iteration
    pub best: S,
    /// `worst - best` after the iteration
    pub spread: S,
}

/// A point of the simplex together with the objective value there.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex<F> {
    pub point: Rn<F>,
    pub value: F,
}

/// `n + 1` vertices in `n` dimensions, kept sorted by value (best first).
#[derive(Debug, Clone, PartialEq)]
pub struct Simplex<F> {
    vertices: Vec<Vertex<F>>,
}

// NaN sorts last, so any NaN vertex makes `spread` NaN and stops the driver.
fn cmp_values<F: Float>(a: F, b: F) -> Ordering {
    a.partial_cmp(&b)
        .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

/// Coordinate-wise mean of the given points.
///
/// Returns `None` for an empty set.
pub fn centroid<'a, F, I>(points: I) -> Option<Rn<F>>
where
    F: Float + 'a,
    I: IntoIterator<Item = &'a Rn<F>>,
{
    let mut points = points.into_iter();
    let mut sum = points.next()?.clone();
    let mut k = 1;
    for p in points {
        sum.add_mut(p);
        k += 1;
    }
    sum.scale(F::one() / from_usize(k));
    Some(sum)
}

impl<F: Float> Simplex<F> {
    /// Initial simplex around `x0`.
    ///
    /// Vertex `0` is `x0`; vertex `d + 1` moves coordinate `d` by the relative
    /// step `h * x0[d]`. A zero coordinate yields a degenerate vertex, so callers
    /// should avoid zeros in `x0`.
    pub fn initial<Func>(mut f: Func, h: F, x0: &Rn<F>) -> Result<Self, SimplexError>
    where
        Func: FnMut(&Rn<F>) -> F,
    {
        if x0.is_empty() {
            return Err(SimplexError::EmptyPoint);
        }
        let mut vertices = Vec::with_capacity(x0.len() + 1);
        vertices.push(Vertex {
            point: x0.clone(),
            value: f(x0),
        });
        for d in 0..x0.len() {
            let mut x = x0.clone();
            x[d] = x[d] + h * x0[d];
            let value = f(&x);
            vertices.push(Vertex { point: x, value });
        }
        Ok(Simplex::sorted(vertices))
    }

    /// Simplex from caller supplied vertices; checks the `n + 1` shape.
    pub fn from_vertices(vertices: Vec<Vertex<F>>) -> Result<Self, SimplexError> {
        let n = match vertices.first() {
            Some(v) if !v.point.is_empty() => v.point.len(),
            _ => return Err(SimplexError::EmptyPoint),
        };
        if vertices.len() != n + 1 {
            return Err(SimplexError::WrongVertexCount {
                dim: n,
                expected: n + 1,
                found: vertices.len(),
            });
        }
        if let Some(v) = vertices.iter().find(|v| v.point.len() != n) {
            return Err(SimplexError::DimensionMismatch {
                expected: n,
                found: v.point.len(),
            });
        }
        Ok(Simplex::sorted(vertices))
    }

    fn sorted(mut vertices: Vec<Vertex<F>>) -> Self {
        vertices.sort_by(|a, b| cmp_values(a.value, b.value));
        Simplex { vertices }
    }

    /// Dimension of the ambient space.
    pub fn dim(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Vertices ordered by value, best first.
    pub fn vertices(&self) -> &[Vertex<F>] {
        &self.vertices
    }

    pub fn best(&self) -> &Vertex<F> {
        &self.vertices[0]
    }

    pub fn worst(&self) -> &Vertex<F> {
        &self.vertices[self.vertices.len() - 1]
    }

    /// The value just below the worst one.
    pub fn second_worst(&self) -> &Vertex<F> {
        &self.vertices[self.vertices.len() - 2]
    }

    /// `worst value - best value`
    pub fn spread(&self) -> F {
        self.worst().value - self.best().value
    }

    fn replace_worst(&self, point: Rn<F>, value: F) -> Self {
        let mut vertices = self.vertices.clone();
        let last = vertices.len() - 1;
        vertices[last] = Vertex { point, value };
        Simplex::sorted(vertices)
    }
}

impl NelderMead<f32> {
    /// Standard coefficients for `f32`
    pub fn new() -> Self {
        NelderMead {
            alpha: 1.,
            gamma: 2.,
            rho: 0.5,
            sigma: 0.5,
            tol: 1e-6,
            max_iter: 1000,
        }
    }
}

impl NelderMead<f64> {
    /// Standard coefficients for `f64`
    pub fn new() -> Self {
        NelderMead {
            alpha: 1.,
            gamma: 2.,
            rho: 0.5,
            sigma: 0.5,
            tol: 1e-8,
            max_iter: 1000,
        }
    }
}

impl Default for NelderMead<f32> {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for NelderMead<f64> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Float> NelderMead<S> {
    /// Performs one reflect/expand/contract/shrink transformation.
    ///
    /// The returned simplex is sorted again and has the same number of vertices.
    pub fn step<Func>(&self, simplex: &Simplex<S>, mut f: Func) -> (Simplex<S>, SimplexStep)
    where
        Func: FnMut(&Rn<S>) -> S,
    {
        let one = S::one();
        let worst = simplex.worst();
        let f1 = simplex.best().value;
        let f_n = simplex.second_worst().value;
        let n = simplex.dim();

        // `dim() >= 1`, so there is at least one point besides the worst
        let x0 = match centroid(simplex.vertices()[..n].iter().map(|v| &v.point)) {
            Some(c) => c,
            None => return (simplex.clone(), SimplexStep::Reflect),
        };

        // x_r = x0 + α(x0 - x_{n+1})
        let mut xr = x0.clone();
        xr.combine(one + self.alpha, &worst.point, -self.alpha);
        let fr = f(&xr);

        if f1 <= fr && fr <= f_n {
            return (simplex.replace_worst(xr, fr), SimplexStep::Reflect);
        }

        if fr < f1 {
            // x_e = x0 + γ(x0 - x_{n+1})
            let mut xe = x0.clone();
            xe.combine(one + self.gamma, &worst.point, -self.gamma);
            let fe = f(&xe);
            return if fe < fr {
                (simplex.replace_worst(xe, fe), SimplexStep::Expand)
            } else {
                (simplex.replace_worst(xr, fr), SimplexStep::Reflect)
            };
        }

        // x_c = x_{n+1} + ρ(x0 - x_{n+1})
        let mut xc = worst.point.clone();
        xc.combine(one - self.rho, &x0, self.rho);
        let fc = f(&xc);
        if fc < worst.value {
            return (simplex.replace_worst(xc, fc), SimplexStep::Contract);
        }

        // shrink everything towards the best vertex
        let best = simplex.best();
        let mut vertices = Vec::with_capacity(n + 1);
        vertices.push(best.clone());
        for v in &simplex.vertices()[1..] {
            let mut x = v.point.clone();
            x.combine(self.sigma, &best.point, one - self.sigma);
            let value = f(&x);
            vertices.push(Vertex { point: x, value });
        }
        (Simplex::sorted(vertices), SimplexStep::Shrink)
    }

    /// Minimize `f` starting from the given simplex.
    ///
    /// Returns the converged simplex; its best vertex is the minimizer.
    pub fn minimize<Func>(&self, simplex: Simplex<S>, f: Func) -> Result<Simplex<S>, SimplexError>
    where
        Func: FnMut(&Rn<S>) -> S,
    {
        self.minimize_with_trace(simplex, f, |_, _| {})
    }

    /// The same as `minimize`, but allows to pass in a callback function that
    /// is called after every iteration.
    pub fn minimize_with_trace<Func, Callback>(
        &self,
        mut simplex: Simplex<S>,
        mut f: Func,
        mut callback: Callback,
    ) -> Result<Simplex<S>, SimplexError>
    where
        Func: FnMut(&Rn<S>) -> S,
        Callback: FnMut(&Simplex<S>, SimplexIteration<S>),
    {
        for k in 0..self.max_iter {
            let spread = simplex.spread();
            if spread.is_nan() {
                return Err(SimplexError::NonFiniteValue {
                    spread: to_f64(spread),
                });
            }
            if spread < self.tol {
                debug!(
                    "simplex converged after {} iterations: best value {}",
                    k,
                    to_f64(simplex.best().value)
                );
                return Ok(simplex);
            }

            let (next, step) = self.step(&simplex, &mut f);
            simplex = next;
            trace!(
                "simplex iteration {}: {:?}, best {}, spread {}",
                k,
                step,
                to_f64(simplex.best().value),
                to_f64(simplex.spread())
            );

            callback(
                &simplex,
                SimplexIteration {
                    k,
                    step,
                    best: simplex.best().value,
                    spread: simplex.spread(),
                },
            );
        }

        if simplex.spread() < self.tol {
            return Ok(simplex);
        }
        warn!(
            "simplex did not converge in {} iterations (spread {})",
            self.max_iter,
            to_f64(simplex.spread())
        );
        Err(SimplexError::MaxIterReached(self.max_iter))
    }
}

#[cfg(test)]
mod test {
    extern crate quickcheck;

    use self::quickcheck::{quickcheck, TestResult};
    use super::*;

    fn bowl(x: &Rn<f64>) -> f64 {
        (x[0] - 3.).powi(2) + (x[1] - 4.).powi(2)
    }

    #[test]
    fn centroid_is_coordinate_mean() {
        fn prop(points: Vec<(i16, i16, i16)>) -> TestResult {
            if points.is_empty() {
                return TestResult::discard();
            }
            let pts: Vec<Rn<f64>> = points
                .iter()
                .map(|&(a, b, c)| Rn::new(vec![a as f64, b as f64, c as f64]))
                .collect();
            let c = centroid(&pts).unwrap();
            let k = pts.len() as f64;
            let ok = (0..3).all(|i| {
                let mean = pts.iter().map(|p| p[i]).sum::<f64>() / k;
                (c[i] - mean).abs() <= 1e-9 * (1. + mean.abs())
            });
            TestResult::from_bool(ok)
        }
        quickcheck(prop as fn(Vec<(i16, i16, i16)>) -> TestResult);
    }

    #[test]
    fn centroid_of_nothing() {
        let pts: Vec<Rn<f64>> = vec![];
        assert_eq!(centroid(&pts), None);
    }

    #[test]
    fn initial_simplex_uses_relative_steps() {
        let s = Simplex::initial(bowl, 0.1, &Rn::new(vec![3., 0.5])).unwrap();
        assert_eq!(s.dim(), 2);
        assert_eq!(s.vertices().len(), 3);
        let points: Vec<_> = s.vertices().iter().map(|v| v.point.to_vec()).collect();
        assert!(points.contains(&vec![3., 0.5]));
        assert!(points.contains(&vec![3. + 0.1 * 3., 0.5]));
        assert!(points.contains(&vec![3., 0.5 + 0.1 * 0.5]));
        // sorted best first
        assert!(s.vertices().windows(2).all(|w| w[0].value <= w[1].value));
    }

    #[test]
    fn empty_point_rejected() {
        let r = Simplex::initial(|_: &Rn<f64>| 0., 0.1, &Rn::new(vec![]));
        assert_eq!(r, Err(SimplexError::EmptyPoint));
    }

    #[test]
    fn from_vertices_checks_shape() {
        let v = |x: Vec<f64>| Vertex {
            value: 0.,
            point: Rn::new(x),
        };
        match Simplex::from_vertices(vec![v(vec![1., 2.]), v(vec![2., 1.])]) {
            Err(SimplexError::WrongVertexCount { dim: 2, expected: 3, found: 2 }) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        match Simplex::from_vertices(vec![v(vec![1., 2.]), v(vec![2.]), v(vec![1., 1.])]) {
            Err(SimplexError::DimensionMismatch { expected: 2, found: 1 }) => (),
            r => panic!("unexpected result: {:?}", r),
        }
        assert!(Simplex::from_vertices(vec![v(vec![1.]), v(vec![2.])]).is_ok());
    }

    #[test]
    fn reflect_expand_contract_shrink() {
        let m = NelderMead::<f64>::new();
        let v = |x: Vec<f64>, f: &dyn Fn(&Rn<f64>) -> f64| {
            let point = Rn::new(x);
            Vertex {
                value: f(&point),
                point,
            }
        };

        // linear slope: reflection keeps improving, so expansion wins
        let lin = |x: &Rn<f64>| x[0];
        let s = Simplex::from_vertices(vec![v(vec![0.], &lin), v(vec![1.], &lin)]).unwrap();
        let (s, step) = m.step(&s, lin);
        assert_eq!(step, SimplexStep::Expand);
        assert_eq!(s.best().point[0], -2.);

        // |x| with the minimum between the vertices: contraction
        let abs = |x: &Rn<f64>| x[0].abs();
        let s = Simplex::from_vertices(vec![v(vec![-1.], &abs), v(vec![1.5], &abs)]).unwrap();
        let (s, step) = m.step(&s, abs);
        assert_eq!(step, SimplexStep::Contract);
        assert_eq!(s.vertices()[0].point[0], 0.25);

        // a spike around the best vertex forces a shrink
        let spike = |x: &Rn<f64>| if x[0] == 0. { 0. } else { 1. / x[0].abs() + 10. };
        let s = Simplex::from_vertices(vec![v(vec![0.], &spike), v(vec![1.], &spike)]).unwrap();
        let (s, step) = m.step(&s, spike);
        assert_eq!(step, SimplexStep::Shrink);
        assert_eq!(s.best().point[0], 0.);
        assert_eq!(s.worst().point[0], 0.5);
    }

    #[test]
    fn simplex_size_is_invariant() {
        fn prop(seed: Vec<i16>, steps: u8) -> TestResult {
            if seed.is_empty() {
                return TestResult::discard();
            }
            let seed: Vec<f64> = seed.iter().take(6).map(|&x| x as f64 / 64. + 0.5).collect();
            let n = seed.len();
            let f = |x: &Rn<f64>| -> f64 { x.iter().enumerate().map(|(i, v)| (i + 1) as f64 * v * v).sum() };
            let m = NelderMead::<f64>::new();
            let mut s = Simplex::initial(f, 0.1, &Rn::new(seed)).unwrap();
            for _ in 0..steps % 40 {
                s = m.step(&s, f).0;
                if s.vertices().len() != n + 1
                    || s.vertices().iter().any(|v| v.point.len() != n)
                {
                    return TestResult::failed();
                }
            }
            TestResult::passed()
        }
        quickcheck(prop as fn(Vec<i16>, u8) -> TestResult);
    }

    #[test]
    fn converges_on_bowl() {
        let m = NelderMead::<f64>::new();
        let s0 = Simplex::initial(bowl, 0.1, &Rn::new(vec![3., 0.5])).unwrap();
        let mut iters = 0;
        let s = m
            .minimize_with_trace(s0, bowl, |s, info| {
                assert_eq!(s.vertices().len(), 3);
                iters = info.k + 1;
            })
            .unwrap();
        assert!(iters > 0);
        assert!(s.spread() < m.tol);
        assert!(s.best().value < 1e-6);
        assert!((s.best().point[0] - 3.).abs() < 1e-2);
        assert!((s.best().point[1] - 4.).abs() < 1e-2);
    }

    #[test]
    fn loose_tolerance_returns_initial_simplex() {
        // the initial spread is 0.44 < 1
        let m = NelderMead { tol: 1., ..NelderMead::<f64>::new() };
        let s0 = Simplex::initial(bowl, 0.1, &Rn::new(vec![3., 0.5])).unwrap();
        let s = m.minimize(s0.clone(), bowl).unwrap();
        assert_eq!(s, s0);
    }

    #[test]
    fn iteration_limit() {
        let m = NelderMead { max_iter: 3, ..NelderMead::<f64>::new() };
        let s0 = Simplex::initial(bowl, 0.1, &Rn::new(vec![-10., -10.])).unwrap();
        assert_eq!(m.minimize(s0, bowl), Err(SimplexError::MaxIterReached(3)));
    }

    #[test]
    fn nan_objective() {
        let m = NelderMead::<f64>::new();
        let s0 = Simplex::initial(|_: &Rn<f64>| f64::NAN, 0.1, &Rn::new(vec![1.])).unwrap();
        match m.minimize(s0, |_: &Rn<f64>| f64::NAN) {
            Err(SimplexError::NonFiniteValue { .. }) => (),
            r => panic!("unexpected result: {:?}", r),
        }

        // a single NaN vertex sorts last and stops the driver
        let f = |x: &Rn<f64>| if x[0] > 1.05 { f64::NAN } else { x[0] * x[0] };
        let s0 = Simplex::initial(f, 0.1, &Rn::new(vec![1.])).unwrap();
        assert_eq!(s0.best().value, 1.);
        assert!(s0.worst().value.is_nan());
        assert!(s0.spread().is_nan());
        match m.minimize(s0, f) {
            Err(SimplexError::NonFiniteValue { .. }) => (),
            r => panic!("unexpected result: {:?}", r),
        }
    }
}
