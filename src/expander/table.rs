//! The generating-function lookup table.
//!
//! Reconstructing a Green's function on a fixed energy grid contracts the
//! moment vector against per-order generating-function values. Those
//! values depend only on the coefficient count, the grid and the scale
//! factor, so repeated reconstructions amortise them through a lookup
//! table keyed on the generating parameters.

use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;

use crate::error::ExpanderError;

/// Guard added under the square root of the generating kernel so the
/// band-edge singularity at `|E| = a` stays finite.
pub(crate) const EDGE_GUARD: f64 = 1e-4;

/// A uniform energy grid, left-closed: sample `e` sits at
/// `lower + (upper - lower) * e / resolution`, so `upper` itself is never
/// sampled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergyGrid {
    lower: f64,
    upper: f64,
    resolution: usize,
}

impl EnergyGrid {
    /// A grid of `resolution` samples on `[lower, upper)`.
    pub fn new(lower: f64, upper: f64, resolution: usize) -> Result<Self, ExpanderError> {
        if !lower.is_finite() || !upper.is_finite() {
            return Err(ExpanderError::InvalidEnergyGrid(format!(
                "bounds [{lower}, {upper}] are not finite"
            )));
        }
        if lower >= upper {
            return Err(ExpanderError::InvalidEnergyGrid(format!(
                "lower bound {lower} is not below upper bound {upper}"
            )));
        }
        if resolution == 0 {
            return Err(ExpanderError::InvalidEnergyGrid(
                "resolution must be at least one sample".into(),
            ));
        }
        Ok(Self {
            lower,
            upper,
            resolution,
        })
    }

    /// Lower edge of the window.
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper edge of the window.
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Number of samples.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// The energy of sample `e`.
    pub fn energy(&self, e: usize) -> f64 {
        self.lower + (self.upper - self.lower) * e as f64 / self.resolution as f64
    }
}

/// The generating parameters a table was built for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TableKey {
    /// Chebyshev coefficient count.
    pub num_coefficients: usize,
    /// The sampled energy window.
    pub grid: EnergyGrid,
}

/// Per-order, per-energy generating-function values with the Jackson
/// kernel and the spectral rescaling baked in.
pub struct GeneratingFunctionTable {
    key: TableKey,
    scale_factor: f64,
    data: Array2<Complex<f64>>,
}

impl GeneratingFunctionTable {
    /// Tabulate the damped generating function over `grid`.
    ///
    /// The window must lie inside the rescaled spectral domain
    /// `[-scale_factor, scale_factor]`.
    pub fn generate(
        num_coefficients: usize,
        grid: EnergyGrid,
        scale_factor: f64,
    ) -> Result<Self, ExpanderError> {
        if num_coefficients == 0 {
            return Err(ExpanderError::InvalidCoefficientCount(num_coefficients));
        }
        if grid.lower < -scale_factor || grid.upper > scale_factor {
            return Err(ExpanderError::BoundsOutsideSpectrum {
                lower: grid.lower,
                upper: grid.upper,
                scale_factor,
            });
        }

        let resolution = grid.resolution;
        let inverse_scale = 1. / scale_factor;
        let mut flat = vec![Complex::new(0., 0.); num_coefficients * resolution];
        flat.par_chunks_mut(resolution)
            .enumerate()
            .for_each(|(order, row)| {
                let jackson = jackson_kernel(order, num_coefficients);
                for (e, value) in row.iter_mut().enumerate() {
                    let scaled_energy = grid.energy(e) * inverse_scale;
                    *value = generating_value(order, scaled_energy, jackson, inverse_scale);
                }
            });

        let data = Array2::from_shape_vec((num_coefficients, resolution), flat)
            .expect("table rows have the grid resolution");
        Ok(Self {
            key: TableKey {
                num_coefficients,
                grid,
            },
            scale_factor,
            data,
        })
    }

    /// The generating parameters of this table.
    pub fn key(&self) -> TableKey {
        self.key
    }

    /// The scale factor the table was generated with.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// The tabulated value at Chebyshev order `order` and grid sample `e`.
    pub fn value(&self, order: usize, e: usize) -> Complex<f64> {
        self.data[[order, e]]
    }

    /// The full table, orders along the first axis.
    pub fn data(&self) -> &Array2<Complex<f64>> {
        &self.data
    }
}

/// Jackson damping factor for order `order` of an expansion with
/// `num_coefficients` coefficients.
pub(crate) fn jackson_kernel(order: usize, num_coefficients: usize) -> f64 {
    let big_n = num_coefficients as f64;
    let order = order as f64;
    let argument = std::f64::consts::PI / (big_n + 1.);
    ((big_n - order + 1.) * (order * argument).cos()
        + (order * argument).sin() * argument.cos() / argument.sin())
        / (big_n + 1.)
}

/// The retarded generating-function value at Chebyshev order `order` for
/// rescaled energy `scaled_energy`, with the Jackson factor and the
/// spectral rescaling folded in. The order-zero term carries the usual
/// halving of the expansion's first coefficient.
pub(crate) fn generating_value(
    order: usize,
    scaled_energy: f64,
    jackson: f64,
    inverse_scale: f64,
) -> Complex<f64> {
    let theta = scaled_energy.acos();
    let root = (1. + EDGE_GUARD - scaled_energy * scaled_energy).sqrt();
    let halving = if order == 0 { 2. } else { 1. };
    let phase = Complex::from_polar(1., -(order as f64) * theta);
    Complex::new(0., -2.) * phase * (jackson * inverse_scale / (root * halving))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn malformed_grids_are_rejected() {
        assert!(matches!(
            EnergyGrid::new(1., -1., 100),
            Err(ExpanderError::InvalidEnergyGrid(_))
        ));
        assert!(matches!(
            EnergyGrid::new(0., 0., 100),
            Err(ExpanderError::InvalidEnergyGrid(_))
        ));
        assert!(matches!(
            EnergyGrid::new(f64::NEG_INFINITY, 1., 100),
            Err(ExpanderError::InvalidEnergyGrid(_))
        ));
        assert!(matches!(
            EnergyGrid::new(-1., 1., 0),
            Err(ExpanderError::InvalidEnergyGrid(_))
        ));
    }

    #[test]
    fn grid_samples_are_left_closed() {
        let grid = EnergyGrid::new(-2., 2., 8).unwrap();
        assert_eq!(grid.energy(0), -2.);
        assert_eq!(grid.energy(4), 0.);
        // The upper bound is excluded.
        assert_eq!(grid.energy(7), 1.5);
    }

    #[test]
    fn jackson_kernel_starts_at_one_and_decreases() {
        let num_coefficients = 64;
        assert_relative_eq!(jackson_kernel(0, num_coefficients), 1., epsilon = 1e-14);
        let mut previous = 1.;
        for order in 1..num_coefficients {
            let factor = jackson_kernel(order, num_coefficients);
            assert!(factor > 0. && factor < previous);
            previous = factor;
        }
    }

    #[test]
    fn window_outside_the_spectrum_is_rejected() {
        let grid = EnergyGrid::new(-3., 3., 100).unwrap();
        assert!(matches!(
            GeneratingFunctionTable::generate(64, grid, 2.),
            Err(ExpanderError::BoundsOutsideSpectrum { .. })
        ));
    }

    #[test]
    fn table_shape_matches_its_key() {
        let grid = EnergyGrid::new(-1.5, 1.5, 40).unwrap();
        let table = GeneratingFunctionTable::generate(32, grid, 2.).unwrap();
        assert_eq!(table.key().num_coefficients, 32);
        assert_eq!(table.key().grid, grid);
        assert_eq!(table.data().dim(), (32, 40));
        assert_eq!(table.scale_factor(), 2.);
    }

    #[test]
    fn order_zero_is_halved() {
        let grid = EnergyGrid::new(-1., 1., 11).unwrap();
        let table = GeneratingFunctionTable::generate(16, grid, 2.).unwrap();
        // Hand-rolled order-zero value without the halving; the phase is
        // unity at order zero so the entry is purely imaginary.
        let scaled = grid.energy(5) / 2.;
        let root = (1. + EDGE_GUARD - scaled * scaled).sqrt();
        let bare = Complex::new(0., -2.) * (jackson_kernel(0, 16) * 0.5 / root);
        assert_relative_eq!(table.value(0, 5).im, bare.im / 2., max_relative = 1e-14);
        assert_relative_eq!(table.value(0, 5).re, 0., epsilon = 1e-15);
    }
}
