//! Fixed-dimension real vector and the arithmetic the optimizer runs on.
//!
//! All mutation is explicit: `clone()` copies values, `clone_new()` allocates
//! a zeroed vector of the same dimension.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Guard added to denominators that may be zero (std, norm)
pub const EPSILON: f64 = 1e-10;

/// Number of bins for short signals; longer signals use twice as many
const SHORT_SIGNAL_BINS: usize = 128;
const LONG_SIGNAL_BINS: usize = 256;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector {
    values: Vec<f64>,
}

impl Vector {
    /// Zero vector of the given dimension
    pub fn new(dim: usize) -> Self {
        Self {
            values: vec![0.0; dim],
        }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, i: usize) -> f64 {
        self.values[i]
    }

    pub fn set_value(&mut self, i: usize, value: f64) {
        self.values[i] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Same-sized zero vector
    pub fn clone_new(&self) -> Self {
        Self::new(self.dim())
    }

    /// Copy the values of `other` into this vector
    pub fn set(&mut self, other: &Vector) {
        debug_assert_eq!(self.dim(), other.dim());
        self.values.copy_from_slice(&other.values);
    }

    pub fn reset(&mut self) {
        self.fill(0.0);
    }

    pub fn fill(&mut self, value: f64) {
        self.values.iter_mut().for_each(|x| *x = value);
    }

    // === Element-wise arithmetic ===

    pub fn add(&mut self, other: &Vector) {
        debug_assert_eq!(self.dim(), other.dim());
        for (x, y) in self.values.iter_mut().zip(&other.values) {
            *x += y;
        }
    }

    pub fn add_scalar(&mut self, value: f64) {
        self.values.iter_mut().for_each(|x| *x += value);
    }

    pub fn subtract(&mut self, other: &Vector) {
        debug_assert_eq!(self.dim(), other.dim());
        for (x, y) in self.values.iter_mut().zip(&other.values) {
            *x -= y;
        }
    }

    pub fn subtract_scalar(&mut self, value: f64) {
        self.values.iter_mut().for_each(|x| *x -= value);
    }

    pub fn multiply(&mut self, other: &Vector) {
        debug_assert_eq!(self.dim(), other.dim());
        for (x, y) in self.values.iter_mut().zip(&other.values) {
            *x *= y;
        }
    }

    pub fn multiply_scalar(&mut self, factor: f64) {
        self.values.iter_mut().for_each(|x| *x *= factor);
    }

    pub fn pow(&mut self, exponent: f64) {
        self.values.iter_mut().for_each(|x| *x = x.powf(exponent));
    }

    pub fn reverse(&mut self) {
        self.values.reverse();
    }

    /// Sum of two vectors as a new vector
    pub fn sum_of(a: &Vector, b: &Vector) -> Vector {
        let mut out = a.clone();
        out.add(b);
        out
    }

    // === Statistics ===

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn avg(&self) -> f64 {
        self.sum() / self.dim() as f64
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        let avg = self.avg();
        self.values.iter().map(|x| (x - avg) * (x - avg)).sum::<f64>() / self.dim() as f64
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// `std / |avg|`, 0 for a constant vector
    pub fn relative_std(&self) -> f64 {
        let std = self.std();
        if std == 0.0 {
            return 0.0;
        }
        std / self.avg().abs()
    }

    /// Shannon entropy of the values interpreted as (unnormalized) weights,
    /// 0 when they sum to 0
    pub fn entropy(&self) -> f64 {
        let sum = self.sum();
        if sum == 0.0 {
            return 0.0;
        }
        -self
            .values
            .iter()
            .filter(|x| **x != 0.0)
            .map(|x| {
                let p = x / sum;
                p * p.ln()
            })
            .sum::<f64>()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn norm(&self) -> f64 {
        self.norm_sqr().sqrt()
    }

    pub fn norm_sqr(&self) -> f64 {
        self.values.iter().map(|x| x * x).sum()
    }

    /// p-norm, `(Σ|x|^p)^(1/p)`
    pub fn norm_p(&self, p: f64) -> f64 {
        self.values
            .iter()
            .map(|x| x.abs().powf(p))
            .sum::<f64>()
            .powf(1.0 / p)
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        debug_assert_eq!(self.dim(), other.dim());
        self.values
            .iter()
            .zip(&other.values)
            .map(|(x, y)| x * y)
            .sum()
    }

    /// Pearson correlation coefficient
    pub fn correlation_coefficient(&self, other: &Vector) -> f64 {
        let (avg_a, avg_b) = (self.avg(), other.avg());
        let mut cov = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (x, y) in self.values.iter().zip(&other.values) {
            cov += (x - avg_a) * (y - avg_b);
            var_a += (x - avg_a) * (x - avg_a);
            var_b += (y - avg_b) * (y - avg_b);
        }
        cov / (var_a.sqrt() * var_b.sqrt())
    }

    pub fn root_mean_square_error(&self, other: &Vector) -> f64 {
        debug_assert_eq!(self.dim(), other.dim());
        let squared: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        (squared / self.dim() as f64).sqrt()
    }

    pub fn residual_sum_of_squares(&self, other: &Vector) -> f64 {
        debug_assert_eq!(self.dim(), other.dim());
        self.values
            .iter()
            .zip(&other.values)
            .map(|(x, y)| (x - y) * (x - y))
            .sum()
    }

    /// Element-wise mean of a set of equally sized vectors
    pub fn mean_vector(vectors: &[Vector]) -> Option<Vector> {
        let first = vectors.first()?;
        let mut mean = first.clone_new();
        for v in vectors {
            mean.add(v);
        }
        mean.multiply_scalar(1.0 / vectors.len() as f64);
        Some(mean)
    }

    /// Sample covariance matrix, one row per dimension
    pub fn covariance_matrix(vectors: &[Vector]) -> Option<Vec<Vec<f64>>> {
        let mean = Self::mean_vector(vectors)?;
        let dim = mean.dim();
        let denom = (vectors.len().max(2) - 1) as f64;
        let mut cov = vec![vec![0.0; dim]; dim];
        for v in vectors {
            for i in 0..dim {
                let di = v.get(i) - mean.get(i);
                for j in 0..dim {
                    cov[i][j] += di * (v.get(j) - mean.get(j));
                }
            }
        }
        for row in cov.iter_mut() {
            row.iter_mut().for_each(|c| *c /= denom);
        }
        Some(cov)
    }

    // === Fourier transform ===

    /// Number of frequency bins used for a signal of this dimension
    pub fn fourier_bins(&self) -> usize {
        if self.dim() <= SHORT_SIGNAL_BINS {
            SHORT_SIGNAL_BINS
        } else {
            LONG_SIGNAL_BINS
        }
    }

    /// Unitary forward transform of the zero-padded signal
    pub fn forward_fourier_transform(&self) -> Vec<Complex> {
        let bins = self.fourier_bins();
        let mut buffer = vec![Complex::ZERO; bins];
        for (slot, x) in buffer.iter_mut().zip(&self.values) {
            *slot = Complex::new(*x, 0.0);
        }
        fft_in_place(&mut buffer, false);
        buffer
    }

    /// Unitary inverse transform
    pub fn inverse_fourier_transform(spectrum: &[Complex]) -> Vec<Complex> {
        let mut buffer = spectrum.to_vec();
        fft_in_place(&mut buffer, true);
        buffer
    }

    /// Real parts of the first `dim` entries
    pub fn from_real_parts(signal: &[Complex], dim: usize) -> Vector {
        let mut out = Vector::new(dim);
        for (i, c) in signal.iter().take(dim).enumerate() {
            out.values[i] = c.re;
        }
        out
    }

    /// Magnitudes of the first `dim` entries
    pub fn from_magnitudes(signal: &[Complex], dim: usize) -> Vector {
        let mut out = Vector::new(dim);
        for (i, c) in signal.iter().take(dim).enumerate() {
            out.values[i] = c.abs();
        }
        out
    }

    /// Circular cross-correlation of `self` against `other`, computed as
    /// `IFFT(conj(FFT(self)) * FFT(other))`.
    pub fn cross_correlation(&self, other: &Vector) -> Vec<Complex> {
        let a = self.forward_fourier_transform();
        let b = other.forward_fourier_transform();
        let product: Vec<Complex> = a.iter().zip(&b).map(|(x, y)| x.conj().mul(*y)).collect();
        Self::inverse_fourier_transform(&product)
    }
}

impl From<Vec<f64>> for Vector {
    fn from(values: Vec<f64>) -> Self {
        Self::from_values(values)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, x) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{x}")?;
        }
        write!(f, "]")
    }
}

/// Minimal complex number for the transforms above
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    pub fn add(self, other: Complex) -> Self {
        Self::new(self.re + other.re, self.im + other.im)
    }

    pub fn sub(self, other: Complex) -> Self {
        Self::new(self.re - other.re, self.im - other.im)
    }

    pub fn mul(self, other: Complex) -> Self {
        Self::new(
            self.re * other.re - self.im * other.im,
            self.re * other.im + self.im * other.re,
        )
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.re * factor, self.im * factor)
    }

    pub fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }
}

/// Iterative radix-2 transform with 1/sqrt(n) normalization in both
/// directions. `buffer.len()` must be a power of two.
fn fft_in_place(buffer: &mut [Complex], inverse: bool) {
    let n = buffer.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    // bit-reversal permutation
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buffer.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let step = Complex::new(angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let mut w = Complex::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = buffer[start + k];
                let v = buffer[start + k + len / 2].mul(w);
                buffer[start + k] = u.add(v);
                buffer[start + k + len / 2] = u.sub(v);
                w = w.mul(step);
            }
        }
        len <<= 1;
    }

    let scale = 1.0 / (n as f64).sqrt();
    buffer.iter_mut().for_each(|c| *c = c.scale(scale));
}

/// Signal normalization applied before shape-matching cost functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Standard,
    MinMax,
    UnitLength,
    None,
}

impl Normalization {
    pub fn apply(&self, vector: &Vector) -> Vector {
        let mut out = vector.clone();
        match self {
            Normalization::Standard => {
                out.subtract_scalar(vector.avg());
                out.multiply_scalar(1.0 / (vector.std() + EPSILON));
            }
            Normalization::MinMax => {
                let (min, max) = (vector.min(), vector.max());
                out.subtract_scalar(min);
                if max > min {
                    out.multiply_scalar(1.0 / (max - min));
                }
            }
            Normalization::UnitLength => {
                out.multiply_scalar(1.0 / (vector.norm() + EPSILON));
            }
            Normalization::None => {}
        }
        out
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::Standard => write!(f, "standard"),
            Normalization::MinMax => write!(f, "min_max"),
            Normalization::UnitLength => write!(f, "unit_length"),
            Normalization::None => write!(f, "none"),
        }
    }
}
