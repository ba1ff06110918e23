//! Sparse Hamiltonian collaborators and spectral rescaling.
//!
//! The expander never owns the model; it consumes a [`HilbertSpace`]
//! collaborator which exposes the basis size, resolves hierarchical site
//! indices to basis coordinates, and hands out the Hamiltonian as a
//! `CsMat`. The only operator the recursion needs is `(H/a)·v`, provided
//! by [`ScaledHamiltonian`].

use num_complex::Complex;
use num_traits::Zero;
use rayon::prelude::*;
use sprs::CsMat;

use crate::error::ExpanderError;

/// The Hamiltonian/basis collaborator consumed by the expander.
///
/// Implementations resolve hierarchical indices (for example `[ix, iy]`
/// on a square lattice) to flat basis coordinates and expose the sparse
/// Hamiltonian itself. Resolution must fail, never clamp, for indices
/// that do not name a basis state.
pub trait HilbertSpace: Send + Sync {
    /// Dimension of the single-particle Hilbert space.
    fn basis_size(&self) -> usize;

    /// Resolve a hierarchical index to its basis coordinate.
    fn basis_index(&self, index: &[i64]) -> Result<usize, ExpanderError>;

    /// The sparse Hamiltonian in CSR form.
    fn hamiltonian(&self) -> &CsMat<Complex<f64>>;
}

/// The one operator primitive the moment recursion consumes.
///
/// This seam exists so the recursion kernel can be driven by test
/// doubles (for instance an apply-counting wrapper verifying that a
/// multi-observation request performs a single shared sweep).
pub trait ApplyHamiltonian: Sync {
    /// Dimension of the vectors this operator acts on.
    fn basis_size(&self) -> usize;

    /// `y ← (H/a)·x`.
    fn apply_into(&self, x: &[Complex<f64>], y: &mut [Complex<f64>]);

    /// `y ← (H/a)·x`, skipping source amplitudes with `|x_j| < cutoff`.
    ///
    /// Experimental: the truncation trades determinism of the expansion
    /// tail for speed and the result is only approximate. The default
    /// implementation ignores the cutoff.
    fn apply_into_with_cutoff(&self, x: &[Complex<f64>], y: &mut [Complex<f64>], _cutoff: f64) {
        self.apply_into(x, y);
    }
}

/// A sparse Hamiltonian together with the scale factor `a` mapping its
/// spectrum into the Chebyshev domain [-1, 1].
///
/// The caller is responsible for choosing `a` so that all eigenvalues of
/// `H` lie in `[-a, a]`; this is not verified. An undersized scale
/// factor silently produces divergent, meaningless moments.
pub struct ScaledHamiltonian<'a> {
    matrix: &'a CsMat<Complex<f64>>,
    scale_factor: f64,
    inverse_scale: f64,
}

impl<'a> ScaledHamiltonian<'a> {
    /// Wrap `matrix` with scale factor `scale_factor`.
    ///
    /// Fails fast if the scale factor is zero, negative or not finite: a
    /// negative factor would silently mirror the spectrum, so it is
    /// rejected alongside the degenerate values.
    pub fn new(
        matrix: &'a CsMat<Complex<f64>>,
        scale_factor: f64,
    ) -> Result<Self, ExpanderError> {
        if !scale_factor.is_finite() || scale_factor <= 0. {
            return Err(ExpanderError::InvalidScaleFactor(scale_factor));
        }
        Ok(Self {
            matrix,
            scale_factor,
            inverse_scale: 1. / scale_factor,
        })
    }

    /// The scale factor `a`.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Raw CSR storage of the wrapped matrix, for device upload.
    #[cfg(feature = "accelerator")]
    pub(crate) fn raw_parts(&self) -> (&[usize], &[usize], &[Complex<f64>], f64) {
        (
            self.matrix.indptr().into_raw_storage(),
            self.matrix.indices(),
            self.matrix.data(),
            self.inverse_scale,
        )
    }
}

impl ApplyHamiltonian for ScaledHamiltonian<'_> {
    fn basis_size(&self) -> usize {
        self.matrix.rows()
    }

    fn apply_into(&self, x: &[Complex<f64>], y: &mut [Complex<f64>]) {
        let indptr = self.matrix.indptr();
        let indptr = indptr.raw_storage();
        let indices = self.matrix.indices();
        let data = self.matrix.data();
        let inverse_scale = self.inverse_scale;

        y.par_iter_mut().enumerate().for_each(|(row, out)| {
            let mut accumulator = Complex::zero();
            for entry in indptr[row]..indptr[row + 1] {
                accumulator += data[entry] * x[indices[entry]];
            }
            *out = accumulator * inverse_scale;
        });
    }

    fn apply_into_with_cutoff(&self, x: &[Complex<f64>], y: &mut [Complex<f64>], cutoff: f64) {
        let indptr = self.matrix.indptr();
        let indptr = indptr.raw_storage();
        let indices = self.matrix.indices();
        let data = self.matrix.data();
        let inverse_scale = self.inverse_scale;
        let cutoff_squared = cutoff * cutoff;

        y.par_iter_mut().enumerate().for_each(|(row, out)| {
            let mut accumulator = Complex::zero();
            for entry in indptr[row]..indptr[row + 1] {
                let amplitude = x[indices[entry]];
                if amplitude.norm_sqr() >= cutoff_squared {
                    accumulator += data[entry] * amplitude;
                }
            }
            *out = accumulator * inverse_scale;
        });
    }
}
