//! Absorbing-boundary damping masks.
//!
//! A damping mask multiplies every basis amplitude after each Hamiltonian
//! application inside the moment recursion, so outgoing amplitude at an
//! open boundary is absorbed instead of reflected back into the interior.
//! An absent mask is the identity.

use std::sync::Arc;

use num_complex::Complex;

/// Elementwise damping multiplier over the Hilbert-space basis.
///
/// The mask is held behind an `Arc`, so the caller keeps ownership of the
/// coefficients and the solver only references them; cloning the mask is
/// cheap and never copies the data.
#[derive(Clone)]
pub struct DampingMask {
    mask: Arc<[Complex<f64>]>,
}

impl DampingMask {
    /// Wrap caller-supplied damping coefficients.
    pub fn new(mask: Arc<[Complex<f64>]>) -> Self {
        Self { mask }
    }

    /// Build a mask by evaluating `factor` at every basis coordinate.
    pub fn from_fn(basis_size: usize, factor: impl Fn(usize) -> Complex<f64>) -> Self {
        Self {
            mask: (0..basis_size).map(factor).collect(),
        }
    }

    /// Number of basis coordinates covered by the mask.
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    /// Whether the mask covers an empty basis.
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    /// The damping coefficients.
    pub fn values(&self) -> &[Complex<f64>] {
        &self.mask
    }

    /// Multiply `vector` elementwise by the mask.
    pub fn apply(&self, vector: &mut [Complex<f64>]) {
        debug_assert_eq!(vector.len(), self.mask.len());
        for (amplitude, damping) in vector.iter_mut().zip(self.mask.iter()) {
            *amplitude *= damping;
        }
    }
}

/// Damping factor for the transmission-free absorbing boundary of
/// Manolopoulos, J. Chem. Phys. 117, 9552 (2002).
///
/// Returns `exp(-γ)` where γ is zero deep in the interior
/// (`distance_to_edge >= boundary_size`), diverges as the domain edge is
/// approached, and the returned factor is zero outside the edge
/// (`distance_to_edge < 0`). `e` and `c` are the tuning parameters of the
/// boundary profile; `c = 2.62` is the optimised value from the paper.
pub fn monolopoulos_abc_damping(
    distance_to_edge: f64,
    boundary_size: f64,
    e: f64,
    c: f64,
) -> Complex<f64> {
    if distance_to_edge < 0. {
        return Complex::new(0., 0.);
    }
    if distance_to_edge >= boundary_size {
        return Complex::new(1., 0.);
    }
    // Progress through the boundary layer, 0 at its inner edge, c at the
    // domain edge where the profile diverges.
    let x = c * (1. - distance_to_edge / boundary_size);
    let gamma = e * (4. / ((c - x) * (c - x)) + 4. / ((c + x) * (c + x)) - 8. / (c * c));
    Complex::new((-gamma).exp(), 0.)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monolopoulos_limits() {
        let interior = monolopoulos_abc_damping(10., 5., 1., 2.62);
        assert_eq!(interior, Complex::new(1., 0.));

        let outside = monolopoulos_abc_damping(-0.1, 5., 1., 2.62);
        assert_eq!(outside, Complex::new(0., 0.));
    }

    #[test]
    fn monolopoulos_decays_monotonically_through_the_boundary() {
        let mut previous = 1.0_f64;
        for step in 1..100 {
            let distance = 5. * (1. - step as f64 / 100.);
            let factor = monolopoulos_abc_damping(distance, 5., 1., 2.62).re;
            assert!(factor >= 0. && factor <= previous, "profile not monotone at {distance}");
            previous = factor;
        }
        // Essentially opaque just inside the edge.
        assert!(previous < 1e-6);
    }

    #[test]
    fn mask_application_is_elementwise() {
        let mask = DampingMask::from_fn(3, |i| Complex::new(i as f64, 0.));
        let mut vector = vec![Complex::new(1., 1.); 3];
        mask.apply(&mut vector);
        assert_eq!(vector[0], Complex::new(0., 0.));
        assert_eq!(vector[1], Complex::new(1., 1.));
        assert_eq!(vector[2], Complex::new(2., 2.));
    }
}
