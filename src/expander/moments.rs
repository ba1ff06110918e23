//! Moment requests and the moment sets they produce.

use ndarray::{Array2, ArrayView1};
use num_complex::Complex;

/// A request for the Chebyshev moments of one source state projected
/// onto any number of observation states.
///
/// All observations share a single recursion sweep, so the cost of a
/// request is set by the coefficient count and the Hamiltonian, not by
/// the number of observations.
pub struct MomentRequest<'a> {
    from: &'a [i64],
    to: Vec<&'a [i64]>,
    num_coefficients: usize,
    broadening: f64,
    component_cutoff: Option<f64>,
}

impl<'a> MomentRequest<'a> {
    /// Moments of `num_coefficients` orders from `from` onto every index
    /// in `to`.
    pub fn new(from: &'a [i64], to: Vec<&'a [i64]>, num_coefficients: usize) -> Self {
        Self {
            from,
            to,
            num_coefficients,
            broadening: 0.,
            component_cutoff: None,
        }
    }

    /// Record a Lorentzian broadening, in energy units, on the produced
    /// moments. It is applied at reconstruction time, not during the
    /// sweep.
    pub fn with_broadening(mut self, broadening: f64) -> Self {
        self.broadening = broadening;
        self
    }

    /// Skip source amplitudes below `cutoff` during the sweep.
    ///
    /// Experimental; host-only, and the resulting expansion is only
    /// approximate.
    pub fn with_component_cutoff(mut self, cutoff: f64) -> Self {
        self.component_cutoff = Some(cutoff);
        self
    }

    /// The source index.
    pub fn from(&self) -> &[i64] {
        self.from
    }

    /// The observation indices.
    pub fn to(&self) -> &[&'a [i64]] {
        &self.to
    }

    /// Requested number of Chebyshev coefficients.
    pub fn num_coefficients(&self) -> usize {
        self.num_coefficients
    }

    /// Recorded Lorentzian broadening.
    pub fn broadening(&self) -> f64 {
        self.broadening
    }

    /// Requested component cutoff, if any.
    pub fn component_cutoff(&self) -> Option<f64> {
        self.component_cutoff
    }
}

/// The moments of every observation of one request, annotated with the
/// generation parameters reconstruction must agree with.
pub struct MomentSet {
    data: Array2<Complex<f64>>,
    scale_factor: f64,
    broadening: f64,
}

impl MomentSet {
    pub(crate) fn new(data: Array2<Complex<f64>>, scale_factor: f64, broadening: f64) -> Self {
        Self {
            data,
            scale_factor,
            broadening,
        }
    }

    /// Number of observation states.
    pub fn num_observations(&self) -> usize {
        self.data.nrows()
    }

    /// Number of Chebyshev coefficients per observation.
    pub fn num_coefficients(&self) -> usize {
        self.data.ncols()
    }

    /// The scale factor the moments were generated with.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// The Lorentzian broadening recorded at request time.
    pub fn broadening(&self) -> f64 {
        self.broadening
    }

    /// The moment vector of observation `observation`.
    pub fn observation(&self, observation: usize) -> MomentVector<'_> {
        MomentVector {
            data: self.data.row(observation),
            scale_factor: self.scale_factor,
            broadening: self.broadening,
        }
    }
}

/// One observation's moments, borrowed from a [`MomentSet`].
#[derive(Clone, Copy)]
pub struct MomentVector<'a> {
    data: ArrayView1<'a, Complex<f64>>,
    scale_factor: f64,
    broadening: f64,
}

impl<'a> MomentVector<'a> {
    /// The Chebyshev coefficients in order.
    ///
    /// The view borrows from the owning [`MomentSet`], not from this
    /// vector, so it may outlive the vector value itself.
    pub fn coefficients(&self) -> ArrayView1<'a, Complex<f64>> {
        self.data
    }

    /// Number of coefficients.
    pub fn num_coefficients(&self) -> usize {
        self.data.len()
    }

    /// Scale factor of the generating sweep.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Recorded Lorentzian broadening.
    pub fn broadening(&self) -> f64 {
        self.broadening
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn observations_slice_the_moment_matrix_by_row() {
        let data = arr2(&[
            [Complex::new(1., 0.), Complex::new(2., 0.)],
            [Complex::new(3., 0.), Complex::new(4., 0.)],
        ]);
        let set = MomentSet::new(data, 2.5, 0.1);
        assert_eq!(set.num_observations(), 2);
        assert_eq!(set.num_coefficients(), 2);

        let second = set.observation(1);
        assert_eq!(second.coefficients()[0], Complex::new(3., 0.));
        assert_eq!(second.scale_factor(), 2.5);
        assert_eq!(second.broadening(), 0.1);
    }

    #[test]
    fn coefficient_views_borrow_from_the_set_not_the_vector() {
        let data = arr2(&[[Complex::new(1., 0.), Complex::new(2., 0.)]]);
        let set = MomentSet::new(data, 2., 0.);
        // The vector is a temporary; the view must stay valid for as
        // long as the set does.
        let coefficients = set.observation(0).coefficients();
        assert_eq!(coefficients[1], Complex::new(2., 0.));
    }

    #[test]
    fn request_defaults_are_exact() {
        let from = [0_i64];
        let to = [1_i64];
        let request = MomentRequest::new(&from, vec![&to[..]], 128);
        assert_eq!(request.broadening(), 0.);
        assert_eq!(request.component_cutoff(), None);

        let request = request.with_broadening(0.05).with_component_cutoff(1e-9);
        assert_eq!(request.broadening(), 0.05);
        assert_eq!(request.component_cutoff(), Some(1e-9));
    }
}
