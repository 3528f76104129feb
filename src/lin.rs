//! Implementation of a basic linear space trait and the dense matrix helpers
//! used by the minimizers.
//!
//! The main interface is `Lin` with an implementation for a vector of real
//! numbers: `Rn<F>`, backed by an `ndarray::Array1<F>`.
//!
//! ```rust
//! use nm_bfgs::{Lin, Rn};
//!
//! let x = Rn::new(vec![1.,2.]);
//! let y = Rn::new(vec![2.,-3.]);
//!
//! assert_eq!(x.dot(&y), -4.);
//! assert_eq!(Rn::new(vec![3., -1.]), x.clone() + y);
//! assert_eq!(Rn::new(vec![2., 4.]), x * 2.);
//! ```
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use num_traits::{Float, One};
use std::ops::{Add, Deref, DerefMut, Mul, Neg, Sub};

/// Trait defining basic operations for an element of a linear space.
///
/// The focus is on operations _in place_: methods that return a `Lin` object
/// modify the object in place.
pub trait Lin {
    /// Scalars for this linear space.
    type F: Float;

    /// Dot product (inner product).
    fn dot(&self, other: &Self) -> Self::F;

    /// Multiplication by a constant.
    fn scale(&mut self, a: Self::F) -> &mut Self;

    /// Adds a vector multiplied by a constant to this vector.
    fn ray_to(&mut self, other: &Self, t: Self::F) -> &mut Self;

    /// Return the origin of the vector space to which self belongs too.
    fn origin(&self) -> Self;

    /// Norm of the vector.
    fn norm(&self) -> Self::F {
        self.norm_squared().sqrt()
    }

    /// Square of the norm.
    fn norm_squared(&self) -> Self::F {
        self.dot(self)
    }

    /// Adds a vector to this vector.
    fn add_mut(&mut self, other: &Self) -> &mut Self {
        self.ray_to(other, Self::F::one())
    }

    /// Creates a linear combination.
    fn combine(&mut self, a: Self::F, other: &Self, b: Self::F) -> &mut Self {
        self.scale(a).ray_to(other, b)
    }
}

/// An implementation of the Lin trait: an n-dimensional real vector.
///
/// Backed by an `Array1<F>`, where `F` is `Float`.
#[derive(Clone, Debug, PartialEq)]
pub struct Rn<F> {
    vec: Array1<F>,
}

impl<F: Float> Rn<F> {
    pub fn new(v: Vec<F>) -> Self {
        Rn {
            vec: Array1::from(v),
        }
    }

    pub fn from_array(a: Array1<F>) -> Self {
        Rn { vec: a }
    }

    pub fn zeros(n: usize) -> Self {
        Rn {
            vec: Array1::from_elem(n, F::zero()),
        }
    }

    /// Unit vector along axis `i`, scaled by `t`.
    pub fn axis(n: usize, i: usize, t: F) -> Self {
        let mut v = Self::zeros(n);
        v[i] = t;
        v
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|x| x.is_finite())
    }
}

impl<F> Deref for Rn<F> {
    type Target = Array1<F>;

    fn deref(&self) -> &Array1<F> {
        &self.vec
    }
}

impl<F> DerefMut for Rn<F> {
    fn deref_mut(&mut self) -> &mut Array1<F> {
        &mut self.vec
    }
}

impl<F: Float> Mul<F> for Rn<F> {
    type Output = Rn<F>;

    fn mul(mut self, other: F) -> Self {
        self.scale(other);
        self
    }
}

impl<F: Float> Add for Rn<F> {
    type Output = Rn<F>;

    fn add(mut self, other: Self) -> Self {
        self.add_mut(&other);
        self
    }
}

impl<F: Float> Sub for Rn<F> {
    type Output = Rn<F>;

    fn sub(mut self, other: Self) -> Self {
        self.ray_to(&other, -F::one());
        self
    }
}

impl<F: Float> Neg for Rn<F> {
    type Output = Rn<F>;

    fn neg(mut self) -> Self {
        self.scale(-F::one());
        self
    }
}

impl<F: Float> Lin for Rn<F> {
    type F = F;

    fn dot(&self, other: &Self) -> Self::F {
        assert_eq!(self.len(), other.len());
        self.iter()
            .zip(other.iter())
            .fold(Self::F::zero(), |sum, (&x, &y)| sum + x * y)
    }

    fn scale(&mut self, a: Self::F) -> &mut Self {
        self.vec.mapv_inplace(|x| x * a);
        self
    }

    fn combine(&mut self, a: Self::F, other: &Self, b: Self::F) -> &mut Self {
        assert_eq!(self.len(), other.len());
        for (x, y) in self.iter_mut().zip(other.iter()) {
            *x = *x * a + *y * b;
        }
        self
    }

    fn ray_to(&mut self, other: &Self, b: Self::F) -> &mut Self {
        assert_eq!(self.len(), other.len());
        for (x, y) in self.iter_mut().zip(other.iter()) {
            *x = *x + *y * b;
        }
        self
    }

    fn origin(&self) -> Self {
        Rn::zeros(self.len())
    }
}

/// `n × n` identity matrix.
pub fn identity<F: Float>(n: usize) -> Array2<F> {
    Array2::from_shape_fn((n, n), |(i, j)| if i == j { F::one() } else { F::zero() })
}

/// Outer product `a bᵀ`.
pub fn outer<F: Float>(a: &Rn<F>, b: &Rn<F>) -> Array2<F> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

/// Matrix-vector product `m v`.
pub fn mat_vec<F: Float>(m: &Array2<F>, v: &Rn<F>) -> Rn<F> {
    assert_eq!(m.ncols(), v.len());
    Rn::from_array(Array1::from_shape_fn(m.nrows(), |i| {
        m.row(i)
            .iter()
            .zip(v.iter())
            .fold(F::zero(), |sum, (&a, &x)| sum + a * x)
    }))
}

/// Quadratic form `vᵀ m v`.
pub fn quad_form<F: Float>(m: &Array2<F>, v: &Rn<F>) -> F {
    v.dot(&mat_vec(m, v))
}

/// Lossy conversion of a scalar to `f64`, for error payloads and logging.
pub fn to_f64<F: Float>(x: F) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

/// Converts a dimension into a scalar.
pub fn from_usize<F: Float>(n: usize) -> F {
    F::from(n).unwrap_or_else(F::max_value)
}

/// Inverse of a square matrix, computed by `nalgebra`.
///
/// Returns `None` if the matrix is empty, not square, contains non-finite
/// entries or is singular.
pub fn invert<F: Float>(m: &Array2<F>) -> Option<Array2<F>> {
    let n = m.nrows();
    if n == 0 || m.ncols() != n || m.iter().any(|x| !x.is_finite()) {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(n, n);
    for ((i, j), &x) in m.indexed_iter() {
        a[(i, j)] = to_f64(x);
    }
    let inv = a.try_inverse()?;

    let mut out = Array2::zeros((n, n));
    for ((i, j), x) in out.indexed_iter_mut() {
        let v = inv[(i, j)];
        if !v.is_finite() {
            return None;
        }
        *x = F::from(v)?;
    }
    Some(out)
}
