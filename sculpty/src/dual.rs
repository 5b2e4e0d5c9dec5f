//! Multi-directional dual numbers.
//!
//! Scalar expressions written against [`DiffScalar`] can be evaluated with
//! plain `f64` for the value alone, with [`DScalar1`] to get the full gradient
//! with respect to every variable at once, or with [`DScalar2`] to additionally
//! get the Hessian. The derivative buffers are `nalgebra` vectors and matrices
//! generic over the dimension, so the common local sizes live on the stack
//! (`Const<N>`) and everything else falls back to the heap (`Dyn`).
//!
//! A constant built for a `Dyn` dimension carries an empty derivative buffer,
//! which every operation treats as zero.

use std::ops::{Add, Mul, Neg, Sub};

use na::allocator::Allocator;
use na::{DefaultAllocator, Dim, OMatrix, OVector, U1};

/// Scalar types that element expressions can be evaluated with.
pub trait DiffScalar:
    Clone + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + Neg<Output = Self>
{
    /// A value with zero derivatives.
    fn constant(v: f64) -> Self;
    /// The real part.
    fn real(&self) -> f64;
    fn sqrt(self) -> Self;
    fn ln(self) -> Self;
    fn recip(self) -> Self;
    fn powf(self, p: f64) -> Self;

    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn scale(self, s: f64) -> Self {
        self * Self::constant(s)
    }
    fn abs(self) -> Self {
        if self.real() < 0.0 {
            -self
        } else {
            self
        }
    }
}

impl DiffScalar for f64 {
    #[inline]
    fn constant(v: f64) -> Self {
        v
    }
    #[inline]
    fn real(&self) -> f64 {
        *self
    }
    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }
    #[inline]
    fn recip(self) -> Self {
        f64::recip(self)
    }
    #[inline]
    fn powf(self, p: f64) -> Self {
        f64::powf(self, p)
    }
    #[inline]
    fn scale(self, s: f64) -> Self {
        self * s
    }
}

/// Forward mode directional derivatives from the `autodiff` crate.
impl DiffScalar for autodiff::F1 {
    fn constant(v: f64) -> Self {
        autodiff::F1::cst(v)
    }
    fn real(&self) -> f64 {
        self.x
    }
    fn sqrt(self) -> Self {
        num_traits::Float::sqrt(self)
    }
    fn ln(self) -> Self {
        num_traits::Float::ln(self)
    }
    fn recip(self) -> Self {
        num_traits::Float::recip(self)
    }
    fn powf(self, p: f64) -> Self {
        num_traits::Float::powf(self, autodiff::F1::cst(p))
    }
}

#[inline]
fn num_vars_of<D: Dim>() -> usize {
    D::try_to_usize().unwrap_or(0)
}

fn zero_vector<D: Dim>(n: usize) -> OVector<f64, D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    OVector::<f64, D>::zeros_generic(D::from_usize(n), U1)
}

fn zero_matrix<D: Dim>(n: usize) -> OMatrix<f64, D, D>
where
    DefaultAllocator: Allocator<f64, D, D>,
{
    OMatrix::<f64, D, D>::zeros_generic(D::from_usize(n), D::from_usize(n))
}

/// Computes `sa * a + sb * b` where an empty operand stands for zero.
fn lin_comb_vec<D: Dim>(
    sa: f64,
    a: &OVector<f64, D>,
    sb: f64,
    b: &OVector<f64, D>,
) -> OVector<f64, D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    if b.len() == 0 {
        let mut out = a.clone();
        out.iter_mut().for_each(|x| *x *= sa);
        return out;
    }
    if a.len() == 0 {
        let mut out = b.clone();
        out.iter_mut().for_each(|x| *x *= sb);
        return out;
    }
    assert_eq!(a.len(), b.len(), "mismatched number of dual variables");
    let mut out = a.clone();
    for i in 0..out.len() {
        out[i] = sa * a[i] + sb * b[i];
    }
    out
}

fn lin_comb_mat<D: Dim>(
    sa: f64,
    a: &OMatrix<f64, D, D>,
    sb: f64,
    b: &OMatrix<f64, D, D>,
) -> OMatrix<f64, D, D>
where
    DefaultAllocator: Allocator<f64, D, D>,
{
    if b.nrows() == 0 {
        let mut out = a.clone();
        out.iter_mut().for_each(|x| *x *= sa);
        return out;
    }
    if a.nrows() == 0 {
        let mut out = b.clone();
        out.iter_mut().for_each(|x| *x *= sb);
        return out;
    }
    assert_eq!(a.nrows(), b.nrows(), "mismatched number of dual variables");
    let mut out = a.clone();
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = sa * x + sb * y;
    }
    out
}

/// Adds `s * (a bᵀ + b aᵀ)` to `h`, growing an empty `h` if needed.
fn add_sym_outer<D: Dim>(h: &mut OMatrix<f64, D, D>, s: f64, a: &OVector<f64, D>, b: &OVector<f64, D>)
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    if a.len() == 0 || b.len() == 0 || s == 0.0 {
        return;
    }
    let n = a.len();
    if h.nrows() == 0 {
        *h = zero_matrix::<D>(n);
    }
    for i in 0..n {
        for j in 0..n {
            h[(i, j)] += s * (a[i] * b[j] + b[i] * a[j]);
        }
    }
}

/// A scalar carrying its gradient with respect to `D` variables.
#[derive(Clone, Debug)]
pub struct DScalar1<D: Dim>
where
    DefaultAllocator: Allocator<f64, D>,
{
    pub value: f64,
    pub grad: OVector<f64, D>,
}

impl<D: Dim> DScalar1<D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    /// The `index`-th of `num_vars` independent variables.
    pub fn variable(value: f64, index: usize, num_vars: usize) -> Self {
        let mut grad = zero_vector::<D>(num_vars);
        grad[index] = 1.0;
        DScalar1 { value, grad }
    }

    /// Seeds one variable per entry of `values`.
    pub fn variables(values: &[f64]) -> Vec<Self> {
        let n = values.len();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Self::variable(v, i, n))
            .collect()
    }

    /// Gradient as a plain vector of length `n`, expanding an empty buffer to zeros.
    pub fn gradient(&self, n: usize) -> Vec<f64> {
        if self.grad.len() == 0 {
            vec![0.0; n]
        } else {
            self.grad.iter().cloned().collect()
        }
    }

    fn chain(&self, f: f64, df: f64) -> Self {
        let mut grad = self.grad.clone();
        grad.iter_mut().for_each(|g| *g *= df);
        DScalar1 { value: f, grad }
    }
}

impl<D: Dim> Add for DScalar1<D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        DScalar1 {
            value: self.value + rhs.value,
            grad: lin_comb_vec(1.0, &self.grad, 1.0, &rhs.grad),
        }
    }
}

impl<D: Dim> Sub for DScalar1<D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        DScalar1 {
            value: self.value - rhs.value,
            grad: lin_comb_vec(1.0, &self.grad, -1.0, &rhs.grad),
        }
    }
}

impl<D: Dim> Mul for DScalar1<D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        DScalar1 {
            value: self.value * rhs.value,
            grad: lin_comb_vec(rhs.value, &self.grad, self.value, &rhs.grad),
        }
    }
}

impl<D: Dim> Neg for DScalar1<D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    type Output = Self;
    fn neg(self) -> Self {
        self.chain(-self.value, -1.0)
    }
}

impl<D: Dim> DiffScalar for DScalar1<D>
where
    DefaultAllocator: Allocator<f64, D>,
{
    fn constant(v: f64) -> Self {
        DScalar1 {
            value: v,
            grad: zero_vector::<D>(num_vars_of::<D>()),
        }
    }
    fn real(&self) -> f64 {
        self.value
    }
    fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s)
    }
    fn ln(self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }
    fn recip(self) -> Self {
        let r = 1.0 / self.value;
        self.chain(r, -r * r)
    }
    fn powf(self, p: f64) -> Self {
        let v = self.value;
        self.chain(v.powf(p), p * v.powf(p - 1.0))
    }
    fn scale(self, s: f64) -> Self {
        self.chain(self.value * s, s)
    }
}

/// A scalar carrying its gradient and Hessian with respect to `D` variables.
#[derive(Clone, Debug)]
pub struct DScalar2<D: Dim>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    pub value: f64,
    pub grad: OVector<f64, D>,
    pub hess: OMatrix<f64, D, D>,
}

impl<D: Dim> DScalar2<D>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    pub fn variable(value: f64, index: usize, num_vars: usize) -> Self {
        let mut grad = zero_vector::<D>(num_vars);
        grad[index] = 1.0;
        DScalar2 {
            value,
            grad,
            hess: zero_matrix::<D>(num_vars),
        }
    }

    pub fn variables(values: &[f64]) -> Vec<Self> {
        let n = values.len();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Self::variable(v, i, n))
            .collect()
    }

    pub fn gradient(&self, n: usize) -> Vec<f64> {
        if self.grad.len() == 0 {
            vec![0.0; n]
        } else {
            self.grad.iter().cloned().collect()
        }
    }

    /// Hessian entry `(i, j)`, zero for an empty buffer.
    pub fn hessian_entry(&self, i: usize, j: usize) -> f64 {
        if self.hess.nrows() == 0 {
            0.0
        } else {
            self.hess[(i, j)]
        }
    }

    /// Applies a scalar function given its value and first two derivatives at `self.value`.
    fn chain(&self, f: f64, df: f64, d2f: f64) -> Self {
        let mut grad = self.grad.clone();
        grad.iter_mut().for_each(|g| *g *= df);
        let mut hess = self.hess.clone();
        hess.iter_mut().for_each(|h| *h *= df);
        add_sym_outer(&mut hess, 0.5 * d2f, &self.grad, &self.grad);
        DScalar2 {
            value: f,
            grad,
            hess,
        }
    }
}

impl<D: Dim> Add for DScalar2<D>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        DScalar2 {
            value: self.value + rhs.value,
            grad: lin_comb_vec(1.0, &self.grad, 1.0, &rhs.grad),
            hess: lin_comb_mat(1.0, &self.hess, 1.0, &rhs.hess),
        }
    }
}

impl<D: Dim> Sub for DScalar2<D>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        DScalar2 {
            value: self.value - rhs.value,
            grad: lin_comb_vec(1.0, &self.grad, -1.0, &rhs.grad),
            hess: lin_comb_mat(1.0, &self.hess, -1.0, &rhs.hess),
        }
    }
}

impl<D: Dim> Mul for DScalar2<D>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let mut hess = lin_comb_mat(rhs.value, &self.hess, self.value, &rhs.hess);
        add_sym_outer(&mut hess, 1.0, &self.grad, &rhs.grad);
        DScalar2 {
            value: self.value * rhs.value,
            grad: lin_comb_vec(rhs.value, &self.grad, self.value, &rhs.grad),
            hess,
        }
    }
}

impl<D: Dim> Neg for DScalar2<D>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    type Output = Self;
    fn neg(self) -> Self {
        self.chain(-self.value, -1.0, 0.0)
    }
}

impl<D: Dim> DiffScalar for DScalar2<D>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    fn constant(v: f64) -> Self {
        let n = num_vars_of::<D>();
        DScalar2 {
            value: v,
            grad: zero_vector::<D>(n),
            hess: zero_matrix::<D>(n),
        }
    }
    fn real(&self) -> f64 {
        self.value
    }
    fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s, -0.25 / (s * self.value))
    }
    fn ln(self) -> Self {
        let r = 1.0 / self.value;
        self.chain(self.value.ln(), r, -r * r)
    }
    fn recip(self) -> Self {
        let r = 1.0 / self.value;
        self.chain(r, -r * r, 2.0 * r * r * r)
    }
    fn powf(self, p: f64) -> Self {
        let v = self.value;
        self.chain(
            v.powf(p),
            p * v.powf(p - 1.0),
            p * (p - 1.0) * v.powf(p - 2.0),
        )
    }
    fn scale(self, s: f64) -> Self {
        self.chain(self.value * s, s, 0.0)
    }
}

/// Capacity class of a derivative buffer, picked from the number of local variables.
///
/// The listed sizes cover linear and bilinear triangles, quads and
/// tetrahedra, quadratic triangles and trilinear hexahedra. Any other count
/// uses the dynamically sized buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DofCapacity {
    N6,
    N8,
    N12,
    N18,
    N24,
    N30,
    Dynamic(usize),
}

impl DofCapacity {
    pub fn for_dofs(n: usize) -> Self {
        match n {
            6 => DofCapacity::N6,
            8 => DofCapacity::N8,
            12 => DofCapacity::N12,
            18 => DofCapacity::N18,
            24 => DofCapacity::N24,
            30 => DofCapacity::N30,
            n => DofCapacity::Dynamic(n),
        }
    }

    pub fn len(self) -> usize {
        match self {
            DofCapacity::N6 => 6,
            DofCapacity::N8 => 8,
            DofCapacity::N12 => 12,
            DofCapacity::N18 => 18,
            DofCapacity::N24 => 24,
            DofCapacity::N30 => 30,
            DofCapacity::Dynamic(n) => n,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// Calls the generic function `$f::<D>(args..)` with the dimension matching the capacity class.
macro_rules! with_capacity {
    ($cap:expr, $f:ident ( $($arg:expr),* $(,)? )) => {
        match $cap {
            $crate::dual::DofCapacity::N6 => $f::<na::Const<6>>($($arg),*),
            $crate::dual::DofCapacity::N8 => $f::<na::Const<8>>($($arg),*),
            $crate::dual::DofCapacity::N12 => $f::<na::Const<12>>($($arg),*),
            $crate::dual::DofCapacity::N18 => $f::<na::Const<18>>($($arg),*),
            $crate::dual::DofCapacity::N24 => $f::<na::Const<24>>($($arg),*),
            $crate::dual::DofCapacity::N30 => $f::<na::Const<30>>($($arg),*),
            $crate::dual::DofCapacity::Dynamic(_) => $f::<na::Dyn>($($arg),*),
        }
    };
}

pub(crate) use with_capacity;
