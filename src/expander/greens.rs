//! Green's function reconstruction from Chebyshev moments.
//!
//! Reconstruction contracts a moment vector against generating-function
//! values on an energy grid, either computed on the fly or read from a
//! generated lookup table. The two paths evaluate the same expression in
//! the same order, so their results agree bitwise.

use num_complex::Complex;
use rayon::prelude::*;

use crate::error::ExpanderError;

use super::{
    moments::MomentVector,
    table::{generating_value, jackson_kernel, EnergyGrid, GeneratingFunctionTable},
};

/// Which analytic continuation to reconstruct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GreensFunctionKind {
    /// Poles pushed below the real axis.
    Retarded,
    /// Poles pushed above the real axis; the conjugate kernel.
    Advanced,
    /// Principal part, `(advanced + retarded) / 2`.
    Principal,
    /// Non-principal part, `(advanced - retarded) / 2`.
    NonPrincipal,
}

/// Lorentzian damping factors applied to the moments at reconstruction.
///
/// `broadening` is in energy units; it is divided by the scale factor to
/// form the dimensionless Lorentz parameter. Zero broadening leaves the
/// expansion undamped.
pub(crate) fn lorentz_factors(
    num_coefficients: usize,
    broadening: f64,
    scale_factor: f64,
) -> Vec<f64> {
    if broadening == 0. {
        return vec![1.; num_coefficients];
    }
    let lambda = num_coefficients as f64 * broadening / scale_factor;
    let denominator = lambda.sinh();
    (0..num_coefficients)
        .map(|order| {
            (lambda * (1. - order as f64 / num_coefficients as f64)).sinh() / denominator
        })
        .collect()
}

/// Contract the moments against per-(order, energy) values.
fn contract(
    moments: &MomentVector<'_>,
    resolution: usize,
    conjugate: bool,
    value: impl Fn(usize, usize) -> Complex<f64> + Sync,
) -> Vec<Complex<f64>> {
    let lorentz = lorentz_factors(
        moments.num_coefficients(),
        moments.broadening(),
        moments.scale_factor(),
    );
    let coefficients = moments.coefficients();
    (0..resolution)
        .into_par_iter()
        .map(|e| {
            let mut green = Complex::new(0., 0.);
            for order in 0..coefficients.len() {
                let mut factor = value(order, e);
                if conjugate {
                    factor = factor.conj();
                }
                green += coefficients[order] * lorentz[order] * factor;
            }
            green
        })
        .collect()
}

fn combine(
    advanced: Vec<Complex<f64>>,
    retarded: Vec<Complex<f64>>,
    sign: f64,
) -> Vec<Complex<f64>> {
    advanced
        .into_iter()
        .zip(retarded)
        .map(|(advanced, retarded)| (advanced + retarded * sign) * 0.5)
        .collect()
}

/// Reconstruct on `grid` with the generating function evaluated on the
/// fly.
pub(crate) fn reconstruct_direct(
    moments: &MomentVector<'_>,
    kind: GreensFunctionKind,
    grid: &EnergyGrid,
) -> Result<Vec<Complex<f64>>, ExpanderError> {
    match kind {
        GreensFunctionKind::Retarded => direct_base(moments, grid, false),
        GreensFunctionKind::Advanced => direct_base(moments, grid, true),
        GreensFunctionKind::Principal => Ok(combine(
            direct_base(moments, grid, true)?,
            direct_base(moments, grid, false)?,
            1.,
        )),
        GreensFunctionKind::NonPrincipal => Ok(combine(
            direct_base(moments, grid, true)?,
            direct_base(moments, grid, false)?,
            -1.,
        )),
    }
}

fn direct_base(
    moments: &MomentVector<'_>,
    grid: &EnergyGrid,
    conjugate: bool,
) -> Result<Vec<Complex<f64>>, ExpanderError> {
    let scale_factor = moments.scale_factor();
    if grid.lower() < -scale_factor || grid.upper() > scale_factor {
        return Err(ExpanderError::BoundsOutsideSpectrum {
            lower: grid.lower(),
            upper: grid.upper(),
            scale_factor,
        });
    }
    let inverse_scale = 1. / scale_factor;
    let num_coefficients = moments.num_coefficients();
    let jackson: Vec<f64> = (0..num_coefficients)
        .map(|order| jackson_kernel(order, num_coefficients))
        .collect();
    Ok(contract(moments, grid.resolution(), conjugate, |order, e| {
        generating_value(
            order,
            grid.energy(e) * inverse_scale,
            jackson[order],
            inverse_scale,
        )
    }))
}

/// Reconstruct against a generated lookup table.
pub(crate) fn reconstruct_cached(
    moments: &MomentVector<'_>,
    kind: GreensFunctionKind,
    table: &GeneratingFunctionTable,
) -> Result<Vec<Complex<f64>>, ExpanderError> {
    match kind {
        GreensFunctionKind::Retarded => cached_base(moments, table, false),
        GreensFunctionKind::Advanced => cached_base(moments, table, true),
        GreensFunctionKind::Principal => Ok(combine(
            cached_base(moments, table, true)?,
            cached_base(moments, table, false)?,
            1.,
        )),
        GreensFunctionKind::NonPrincipal => Ok(combine(
            cached_base(moments, table, true)?,
            cached_base(moments, table, false)?,
            -1.,
        )),
    }
}

fn cached_base(
    moments: &MomentVector<'_>,
    table: &GeneratingFunctionTable,
    conjugate: bool,
) -> Result<Vec<Complex<f64>>, ExpanderError> {
    if table.key().num_coefficients != moments.num_coefficients() {
        return Err(ExpanderError::TableKeyMismatch {
            expected: table.key().num_coefficients,
            requested: moments.num_coefficients(),
        });
    }
    if table.scale_factor() != moments.scale_factor() {
        return Err(ExpanderError::ScaleFactorMismatch {
            moments: moments.scale_factor(),
            reconstruction: table.scale_factor(),
        });
    }
    Ok(contract(
        moments,
        table.key().grid.resolution(),
        conjugate,
        |order, e| table.value(order, e),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::expander::moments::MomentSet;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn sample_moments(broadening: f64) -> MomentSet {
        let num_coefficients = 32;
        let theta: f64 = 0.8;
        let data = Array2::from_shape_fn((1, num_coefficients), |(_, order)| {
            Complex::new((order as f64 * theta).cos(), 0.)
        });
        MomentSet::new(data, 2., broadening)
    }

    #[test]
    fn lorentz_factors_without_broadening_are_unity() {
        assert_eq!(lorentz_factors(16, 0., 2.), vec![1.; 16]);
    }

    #[test]
    fn lorentz_factors_start_at_one_and_decay() {
        let factors = lorentz_factors(64, 0.1, 2.);
        assert_relative_eq!(factors[0], 1., epsilon = 1e-14);
        for pair in factors.windows(2) {
            assert!(pair[1] < pair[0] && pair[1] > 0.);
        }
    }

    #[test]
    fn advanced_is_the_conjugate_of_retarded_for_real_moments() {
        let set = sample_moments(0.05);
        let grid = EnergyGrid::new(-1.8, 1.8, 60).unwrap();
        let retarded =
            reconstruct_direct(&set.observation(0), GreensFunctionKind::Retarded, &grid).unwrap();
        let advanced =
            reconstruct_direct(&set.observation(0), GreensFunctionKind::Advanced, &grid).unwrap();
        for (advanced, retarded) in advanced.iter().zip(retarded.iter()) {
            assert_relative_eq!(advanced.re, retarded.re, max_relative = 1e-12);
            assert_relative_eq!(advanced.im, -retarded.im, max_relative = 1e-12);
        }
    }

    #[test]
    fn principal_parts_recombine_into_the_continuations() {
        let set = sample_moments(0.02);
        let grid = EnergyGrid::new(-1.5, 1.5, 45).unwrap();
        let moments = set.observation(0);
        let retarded =
            reconstruct_direct(&moments, GreensFunctionKind::Retarded, &grid).unwrap();
        let advanced =
            reconstruct_direct(&moments, GreensFunctionKind::Advanced, &grid).unwrap();
        let principal =
            reconstruct_direct(&moments, GreensFunctionKind::Principal, &grid).unwrap();
        let non_principal =
            reconstruct_direct(&moments, GreensFunctionKind::NonPrincipal, &grid).unwrap();

        for e in 0..grid.resolution() {
            let recombined_advanced = principal[e] + non_principal[e];
            let recombined_retarded = principal[e] - non_principal[e];
            assert_relative_eq!(recombined_advanced.re, advanced[e].re, max_relative = 1e-12);
            assert_relative_eq!(recombined_advanced.im, advanced[e].im, max_relative = 1e-12);
            assert_relative_eq!(recombined_retarded.re, retarded[e].re, max_relative = 1e-12);
            assert_relative_eq!(recombined_retarded.im, retarded[e].im, max_relative = 1e-12);
        }
    }

    #[test]
    fn window_beyond_the_moments_scale_factor_is_rejected() {
        let set = sample_moments(0.);
        let grid = EnergyGrid::new(-2.5, 2.5, 10).unwrap();
        assert!(matches!(
            reconstruct_direct(&set.observation(0), GreensFunctionKind::Retarded, &grid),
            Err(ExpanderError::BoundsOutsideSpectrum { .. })
        ));
    }

    #[test]
    fn cached_reconstruction_checks_the_table_key() {
        let set = sample_moments(0.);
        let grid = EnergyGrid::new(-1.5, 1.5, 20).unwrap();

        let wrong_order = GeneratingFunctionTable::generate(16, grid, 2.).unwrap();
        assert!(matches!(
            reconstruct_cached(&set.observation(0), GreensFunctionKind::Retarded, &wrong_order),
            Err(ExpanderError::TableKeyMismatch {
                expected: 16,
                requested: 32
            })
        ));

        let wrong_scale = GeneratingFunctionTable::generate(32, grid, 3.).unwrap();
        assert!(matches!(
            reconstruct_cached(&set.observation(0), GreensFunctionKind::Retarded, &wrong_scale),
            Err(ExpanderError::ScaleFactorMismatch { .. })
        ));
    }

    #[test]
    fn cached_reconstruction_is_bitwise_identical_to_direct() {
        let set = sample_moments(0.03);
        let grid = EnergyGrid::new(-1.9, 1.9, 80).unwrap();
        let table = GeneratingFunctionTable::generate(32, grid, 2.).unwrap();
        for kind in [
            GreensFunctionKind::Retarded,
            GreensFunctionKind::Advanced,
            GreensFunctionKind::Principal,
            GreensFunctionKind::NonPrincipal,
        ] {
            let direct = reconstruct_direct(&set.observation(0), kind, &grid).unwrap();
            let cached = reconstruct_cached(&set.observation(0), kind, &table).unwrap();
            assert_eq!(direct, cached);
        }
    }
}
