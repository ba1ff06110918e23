// Copyright 2022 kpm-greens authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Chebyshev expander.
//!
//! [`ChebyshevExpander`] is the solver facade: it borrows a
//! [`HilbertSpace`] collaborator, carries the spectral scale factor fixed
//! at construction, and exposes the two halves of the calculation. Moment
//! generation runs the shared recursion sweep on the host or, when the
//! `accelerator` feature is enabled and an accelerator is attached, on
//! the device. Reconstruction contracts moment vectors into retarded,
//! advanced, principal or non-principal Green's functions, either
//! directly or through a generated lookup table.

pub(crate) mod greens;
pub(crate) mod moments;
pub(crate) mod table;

use std::sync::Arc;

use num_complex::Complex64;

use crate::{
    backend::{ComputeBackend, HostBackend},
    damping::DampingMask,
    error::ExpanderError,
    hamiltonian::{HilbertSpace, ScaledHamiltonian},
};

#[cfg(feature = "accelerator")]
use crate::backend::DeviceBackend;

pub use greens::GreensFunctionKind;
pub use moments::{MomentRequest, MomentSet, MomentVector};
pub use table::{EnergyGrid, GeneratingFunctionTable, TableKey};

/// Chebyshev-expansion Green's function solver over a borrowed Hilbert
/// space.
///
/// The scale factor is immutable after construction; every moment set
/// and lookup table produced by one expander therefore agrees on the
/// spectral rescaling by construction. Table generation and destruction
/// take `&mut self` while reconstruction takes `&self`, so the borrow
/// checker rules out reconstructing against a table mid-replacement.
pub struct ChebyshevExpander<'a, S: HilbertSpace> {
    space: &'a S,
    scale_factor: f64,
    damping: Option<DampingMask>,
    table: Option<Arc<GeneratingFunctionTable>>,
    host: HostBackend,
    #[cfg(feature = "accelerator")]
    accelerator: Option<DeviceBackend>,
}

/// Builder for [`ChebyshevExpander`].
///
/// There is no safe model-independent default scale factor, so `build`
/// fails rather than guessing when none was supplied.
pub struct ChebyshevExpanderBuilder<RefSpace> {
    space: RefSpace,
    scale_factor: Option<f64>,
    damping: Option<DampingMask>,
}

impl ChebyshevExpanderBuilder<()> {
    /// An empty builder.
    pub fn new() -> Self {
        Self {
            space: (),
            scale_factor: None,
            damping: None,
        }
    }
}

impl Default for ChebyshevExpanderBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<RefSpace> ChebyshevExpanderBuilder<RefSpace> {
    /// Attach the Hilbert-space collaborator.
    pub fn with_space<S: HilbertSpace>(self, space: &S) -> ChebyshevExpanderBuilder<&S> {
        ChebyshevExpanderBuilder {
            space,
            scale_factor: self.scale_factor,
            damping: self.damping,
        }
    }

    /// Set the spectral scale factor `a`; all eigenvalues of the
    /// Hamiltonian must lie in `[-a, a]`.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = Some(scale_factor);
        self
    }

    /// Attach a damping mask applied after every Hamiltonian application
    /// in the recursion.
    pub fn with_damping(mut self, damping: DampingMask) -> Self {
        self.damping = Some(damping);
        self
    }
}

impl<'a, S: HilbertSpace> ChebyshevExpanderBuilder<&'a S> {
    /// Validate the configuration and construct the expander.
    pub fn build(self) -> Result<ChebyshevExpander<'a, S>, ExpanderError> {
        let scale_factor = self
            .scale_factor
            .ok_or(ExpanderError::MissingScaleFactor)?;
        if !scale_factor.is_finite() || scale_factor <= 0. {
            return Err(ExpanderError::InvalidScaleFactor(scale_factor));
        }
        if let Some(damping) = &self.damping {
            if damping.len() != self.space.basis_size() {
                return Err(ExpanderError::DampingMaskLength {
                    mask: damping.len(),
                    basis: self.space.basis_size(),
                });
            }
        }
        Ok(ChebyshevExpander {
            space: self.space,
            scale_factor,
            damping: self.damping,
            table: None,
            host: HostBackend::new(),
            #[cfg(feature = "accelerator")]
            accelerator: None,
        })
    }
}

impl<'a, S: HilbertSpace> ChebyshevExpander<'a, S> {
    /// An empty builder.
    pub fn builder() -> ChebyshevExpanderBuilder<()> {
        ChebyshevExpanderBuilder::new()
    }

    /// The spectral scale factor.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Compute the Chebyshev moments of a request on the host.
    #[tracing::instrument(
        level = "trace",
        skip_all,
        fields(
            num_coefficients = request.num_coefficients(),
            observations = request.to().len()
        )
    )]
    pub fn moments(&self, request: &MomentRequest<'_>) -> Result<MomentSet, ExpanderError> {
        self.validate_request(request)?;
        let from = self.resolve(request.from())?;
        let to = request
            .to()
            .iter()
            .map(|index| self.resolve(index))
            .collect::<Result<Vec<_>, _>>()?;
        let scaled = ScaledHamiltonian::new(self.space.hamiltonian(), self.scale_factor)?;
        let data = self.host.moment_sweep(
            &scaled,
            self.damping.as_ref(),
            from,
            &to,
            request.num_coefficients(),
            request.component_cutoff(),
        )?;
        Ok(MomentSet::new(data, self.scale_factor, request.broadening()))
    }

    /// Generate the lookup table for cached reconstruction, replacing any
    /// previous table.
    ///
    /// Any mirror of the previous table on an attached accelerator is
    /// invalidated and must be reloaded.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn generate_table(
        &mut self,
        num_coefficients: usize,
        grid: EnergyGrid,
    ) -> Result<(), ExpanderError> {
        let table = Arc::new(GeneratingFunctionTable::generate(
            num_coefficients,
            grid,
            self.scale_factor,
        )?);
        self.host.upload_table(&table)?;
        self.table = Some(table);
        #[cfg(feature = "accelerator")]
        if let Some(accelerator) = &mut self.accelerator {
            accelerator.invalidate_table();
        }
        Ok(())
    }

    /// Drop the lookup table everywhere.
    pub fn destroy_table(&mut self) {
        self.table = None;
        self.host.invalidate_table();
        #[cfg(feature = "accelerator")]
        if let Some(accelerator) = &mut self.accelerator {
            accelerator.invalidate_table();
        }
    }

    /// Whether a lookup table is currently generated.
    pub fn table_is_generated(&self) -> bool {
        self.host.table_is_loaded()
    }

    /// The generated lookup table, if any.
    pub fn table(&self) -> Option<&GeneratingFunctionTable> {
        self.table.as_deref()
    }

    /// Reconstruct a Green's function on `grid`, evaluating the
    /// generating function on the fly.
    pub fn greens_function(
        &self,
        moments: &MomentVector<'_>,
        kind: GreensFunctionKind,
        grid: EnergyGrid,
    ) -> Result<Vec<Complex64>, ExpanderError> {
        self.check_moment_provenance(moments)?;
        greens::reconstruct_direct(moments, kind, &grid)
    }

    /// Reconstruct a Green's function against the generated lookup table.
    pub fn greens_function_cached(
        &self,
        moments: &MomentVector<'_>,
        kind: GreensFunctionKind,
    ) -> Result<Vec<Complex64>, ExpanderError> {
        self.check_moment_provenance(moments)?;
        self.host.reconstruct_cached(moments, kind)
    }

    fn check_moment_provenance(
        &self,
        moments: &MomentVector<'_>,
    ) -> Result<(), ExpanderError> {
        if moments.scale_factor() != self.scale_factor {
            return Err(ExpanderError::ScaleFactorMismatch {
                moments: moments.scale_factor(),
                reconstruction: self.scale_factor,
            });
        }
        Ok(())
    }

    fn validate_request(&self, request: &MomentRequest<'_>) -> Result<(), ExpanderError> {
        if request.num_coefficients() == 0 {
            return Err(ExpanderError::InvalidCoefficientCount(0));
        }
        if request.broadening() < 0. {
            return Err(ExpanderError::NegativeBroadening(request.broadening()));
        }
        if let Some(cutoff) = request.component_cutoff() {
            if cutoff < 0. {
                return Err(ExpanderError::NegativeCutoff(cutoff));
            }
        }
        Ok(())
    }

    fn resolve(&self, index: &[i64]) -> Result<usize, ExpanderError> {
        if index.iter().any(|&coordinate| coordinate < 0) {
            return Err(ExpanderError::NegativeIndexComponent(index.to_vec()));
        }
        self.space.basis_index(index)
    }
}

#[cfg(feature = "accelerator")]
impl<'a, S: HilbertSpace> ChebyshevExpander<'a, S> {
    /// Attach an accelerator, selecting the first adapter with `f64`
    /// shader support.
    pub fn attach_accelerator(&mut self) -> Result<(), ExpanderError> {
        if self.accelerator.is_none() {
            self.accelerator = Some(DeviceBackend::new()?);
        }
        Ok(())
    }

    /// Compute the Chebyshev moments of a request on the accelerator.
    ///
    /// The component cutoff path is host-only and is rejected here.
    #[tracing::instrument(
        level = "trace",
        skip_all,
        fields(
            num_coefficients = request.num_coefficients(),
            observations = request.to().len()
        )
    )]
    pub fn moments_on_accelerator(
        &self,
        request: &MomentRequest<'_>,
    ) -> Result<MomentSet, ExpanderError> {
        self.validate_request(request)?;
        if request.component_cutoff().is_some() {
            return Err(ExpanderError::CutoffOnAccelerator);
        }
        let accelerator = self
            .accelerator
            .as_ref()
            .ok_or(ExpanderError::AcceleratorNotAttached)?;
        let from = self.resolve(request.from())?;
        let to = request
            .to()
            .iter()
            .map(|index| self.resolve(index))
            .collect::<Result<Vec<_>, _>>()?;
        let scaled = ScaledHamiltonian::new(self.space.hamiltonian(), self.scale_factor)?;
        let data = accelerator.moment_sweep(
            &scaled,
            self.damping.as_ref(),
            from,
            &to,
            request.num_coefficients(),
            None,
        )?;
        Ok(MomentSet::new(data, self.scale_factor, request.broadening()))
    }

    /// Mirror the generated lookup table onto the accelerator.
    pub fn load_table_on_accelerator(&mut self) -> Result<(), ExpanderError> {
        let table = self.table.clone().ok_or(ExpanderError::MissingTable)?;
        let accelerator = self
            .accelerator
            .as_mut()
            .ok_or(ExpanderError::AcceleratorNotAttached)?;
        accelerator.upload_table(&table)
    }

    /// Drop the accelerator's mirror of the lookup table.
    pub fn destroy_table_on_accelerator(&mut self) -> Result<(), ExpanderError> {
        let accelerator = self
            .accelerator
            .as_mut()
            .ok_or(ExpanderError::AcceleratorNotAttached)?;
        accelerator.invalidate_table();
        Ok(())
    }

    /// Whether the lookup table is mirrored on the accelerator.
    pub fn table_is_loaded_on_accelerator(&self) -> bool {
        self.accelerator
            .as_ref()
            .map(|accelerator| accelerator.table_is_loaded())
            .unwrap_or(false)
    }

    /// Reconstruct a Green's function against the accelerator's table
    /// mirror.
    pub fn greens_function_on_accelerator(
        &self,
        moments: &MomentVector<'_>,
        kind: GreensFunctionKind,
    ) -> Result<Vec<Complex64>, ExpanderError> {
        self.check_moment_provenance(moments)?;
        let accelerator = self
            .accelerator
            .as_ref()
            .ok_or(ExpanderError::AcceleratorNotAttached)?;
        accelerator.reconstruct_cached(moments, kind)
    }
}

#[cfg(not(feature = "accelerator"))]
impl<'a, S: HilbertSpace> ChebyshevExpander<'a, S> {
    /// Accelerator support was not compiled in.
    pub fn attach_accelerator(&mut self) -> Result<(), ExpanderError> {
        Err(ExpanderError::AcceleratorSupport)
    }

    /// Accelerator support was not compiled in.
    pub fn moments_on_accelerator(
        &self,
        _request: &MomentRequest<'_>,
    ) -> Result<MomentSet, ExpanderError> {
        Err(ExpanderError::AcceleratorSupport)
    }

    /// Accelerator support was not compiled in.
    pub fn load_table_on_accelerator(&mut self) -> Result<(), ExpanderError> {
        Err(ExpanderError::AcceleratorSupport)
    }

    /// Accelerator support was not compiled in.
    pub fn destroy_table_on_accelerator(&mut self) -> Result<(), ExpanderError> {
        Err(ExpanderError::AcceleratorSupport)
    }

    /// Accelerator support was not compiled in.
    pub fn table_is_loaded_on_accelerator(&self) -> bool {
        false
    }

    /// Accelerator support was not compiled in.
    pub fn greens_function_on_accelerator(
        &self,
        _moments: &MomentVector<'_>,
        _kind: GreensFunctionKind,
    ) -> Result<Vec<Complex64>, ExpanderError> {
        Err(ExpanderError::AcceleratorSupport)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::TightBindingModel;
    use num_complex::Complex;

    fn expander(model: &TightBindingModel, scale_factor: f64) -> ChebyshevExpander<'_, TightBindingModel> {
        ChebyshevExpanderBuilder::new()
            .with_space(model)
            .with_scale_factor(scale_factor)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_a_scale_factor() {
        let model = TightBindingModel::single_site(0.);
        let result = ChebyshevExpanderBuilder::new().with_space(&model).build();
        assert!(matches!(result, Err(ExpanderError::MissingScaleFactor)));
    }

    #[test]
    fn builder_rejects_a_mismatched_damping_mask() {
        let model = TightBindingModel::chain(8, 1., 0., 0);
        let result = ChebyshevExpanderBuilder::new()
            .with_space(&model)
            .with_scale_factor(2.5)
            .with_damping(DampingMask::from_fn(4, |_| Complex::new(1., 0.)))
            .build();
        assert!(matches!(
            result,
            Err(ExpanderError::DampingMaskLength { mask: 4, basis: 8 })
        ));
    }

    #[test]
    fn malformed_requests_are_rejected() {
        let model = TightBindingModel::single_site(0.);
        let solver = expander(&model, 1.5);
        let from = [0_i64];

        let zero_orders = MomentRequest::new(&from, vec![&from[..]], 0);
        assert!(matches!(
            solver.moments(&zero_orders),
            Err(ExpanderError::InvalidCoefficientCount(0))
        ));

        let negative_broadening =
            MomentRequest::new(&from, vec![&from[..]], 16).with_broadening(-0.1);
        assert!(matches!(
            solver.moments(&negative_broadening),
            Err(ExpanderError::NegativeBroadening(_))
        ));

        let negative_cutoff =
            MomentRequest::new(&from, vec![&from[..]], 16).with_component_cutoff(-1e-6);
        assert!(matches!(
            solver.moments(&negative_cutoff),
            Err(ExpanderError::NegativeCutoff(_))
        ));
    }

    #[test]
    fn unresolvable_indices_are_rejected() {
        let model = TightBindingModel::chain(4, 1., 0., 0);
        let solver = expander(&model, 2.5);

        let negative = [-1_i64];
        let valid = [0_i64];
        let request = MomentRequest::new(&negative, vec![&valid[..]], 8);
        assert!(matches!(
            solver.moments(&request),
            Err(ExpanderError::NegativeIndexComponent(_))
        ));

        let out_of_range = [7_i64];
        let request = MomentRequest::new(&valid, vec![&out_of_range[..]], 8);
        assert!(matches!(
            solver.moments(&request),
            Err(ExpanderError::UnknownIndex(_))
        ));
    }

    #[test]
    fn isolated_level_reconstructs_its_resolvent() {
        let level = 1.;
        let scale_factor = 1.5;
        let broadening = 0.05;
        let model = TightBindingModel::single_site(level);
        let solver = expander(&model, scale_factor);

        let from = [0_i64];
        let request =
            MomentRequest::new(&from, vec![&from[..]], 2048).with_broadening(broadening);
        let moments = solver.moments(&request).unwrap();

        let grid = EnergyGrid::new(-1.2, 1.2, 121).unwrap();
        let green = solver
            .greens_function(&moments.observation(0), GreensFunctionKind::Retarded, grid)
            .unwrap();

        // Away from the band edges the reconstruction is the Lorentzian
        // resolvent 1/(E - level + i*eta) with an energy-dependent
        // effective eta; compare through the inverse so the test is
        // uniformly sharp on and off resonance.
        let mut peak: f64 = 0.;
        for (e, value) in green.iter().enumerate() {
            let energy = grid.energy(e);
            let inverse = 1. / value;
            let expected = Complex::new(energy - level, broadening);
            assert!(
                (inverse - expected).norm() < 0.18,
                "resolvent deviates at E = {energy}: {inverse} vs {expected}"
            );
            peak = peak.max(value.norm());
        }
        assert!(peak > 10., "no resonance peak: max |G| = {peak}");
    }

    #[test]
    fn isolated_level_carries_unit_spectral_weight() {
        let level = 1.;
        let scale_factor = 1.5;
        let model = TightBindingModel::single_site(level);
        let solver = expander(&model, scale_factor);

        let from = [0_i64];
        let request = MomentRequest::new(&from, vec![&from[..]], 2048).with_broadening(0.05);
        let moments = solver.moments(&request).unwrap();

        let grid = EnergyGrid::new(-1.45, 1.45, 600).unwrap();
        let green = solver
            .greens_function(&moments.observation(0), GreensFunctionKind::Retarded, grid)
            .unwrap();

        let step = (grid.upper() - grid.lower()) / grid.resolution() as f64;
        let weight: f64 = green
            .iter()
            .map(|value| -value.im / std::f64::consts::PI * step)
            .sum();
        assert!(
            (weight - 1.).abs() < 0.15,
            "spectral weight {weight} is not normalised"
        );
    }

    #[test]
    fn cached_reconstruction_matches_the_direct_path() {
        let model = TightBindingModel::chain(32, 1., 0.5, 3);
        let mut solver = expander(&model, 3.);

        let from = [16_i64];
        let to_a = [16_i64];
        let to_b = [20_i64];
        let request = MomentRequest::new(&from, vec![&to_a[..], &to_b[..]], 256)
            .with_broadening(0.05);
        let moments = solver.moments(&request).unwrap();

        let grid = EnergyGrid::new(-2.8, 2.8, 200).unwrap();
        assert!(!solver.table_is_generated());
        solver.generate_table(256, grid).unwrap();
        assert!(solver.table_is_generated());

        for observation in 0..2 {
            for kind in [
                GreensFunctionKind::Retarded,
                GreensFunctionKind::Advanced,
                GreensFunctionKind::Principal,
                GreensFunctionKind::NonPrincipal,
            ] {
                let direct = solver
                    .greens_function(&moments.observation(observation), kind, grid)
                    .unwrap();
                let cached = solver
                    .greens_function_cached(&moments.observation(observation), kind)
                    .unwrap();
                assert_eq!(direct, cached);
            }
        }
    }

    #[test]
    fn cached_reconstruction_requires_a_table() {
        let model = TightBindingModel::chain(8, 1., 0., 0);
        let solver = expander(&model, 2.5);
        let from = [4_i64];
        let request = MomentRequest::new(&from, vec![&from[..]], 32);
        let moments = solver.moments(&request).unwrap();
        assert!(matches!(
            solver.greens_function_cached(&moments.observation(0), GreensFunctionKind::Retarded),
            Err(ExpanderError::MissingTable)
        ));
    }

    #[test]
    fn regenerated_table_rejects_stale_moments() {
        let model = TightBindingModel::chain(8, 1., 0., 0);
        let mut solver = expander(&model, 2.5);
        let grid = EnergyGrid::new(-2., 2., 50).unwrap();

        let from = [4_i64];
        let request = MomentRequest::new(&from, vec![&from[..]], 64);
        let moments = solver.moments(&request).unwrap();

        solver.generate_table(64, grid).unwrap();
        assert!(solver
            .greens_function_cached(&moments.observation(0), GreensFunctionKind::Retarded)
            .is_ok());

        solver.generate_table(128, grid).unwrap();
        assert!(matches!(
            solver.greens_function_cached(&moments.observation(0), GreensFunctionKind::Retarded),
            Err(ExpanderError::TableKeyMismatch {
                expected: 128,
                requested: 64
            })
        ));

        solver.destroy_table();
        assert!(!solver.table_is_generated());
        assert!(matches!(
            solver.greens_function_cached(&moments.observation(0), GreensFunctionKind::Retarded),
            Err(ExpanderError::MissingTable)
        ));
    }

    #[test]
    fn foreign_moments_are_rejected() {
        let model = TightBindingModel::chain(8, 1., 0., 0);
        let solver = expander(&model, 2.5);
        let other = expander(&model, 3.5);

        let from = [4_i64];
        let request = MomentRequest::new(&from, vec![&from[..]], 32);
        let moments = other.moments(&request).unwrap();

        let grid = EnergyGrid::new(-2., 2., 20).unwrap();
        assert!(matches!(
            solver.greens_function(&moments.observation(0), GreensFunctionKind::Retarded, grid),
            Err(ExpanderError::ScaleFactorMismatch { .. })
        ));
    }

    #[cfg(not(feature = "accelerator"))]
    #[test]
    fn accelerator_entry_points_report_missing_support() {
        let model = TightBindingModel::single_site(0.);
        let mut solver = expander(&model, 1.5);
        assert!(matches!(
            solver.attach_accelerator(),
            Err(ExpanderError::AcceleratorSupport)
        ));
        assert!(matches!(
            solver.load_table_on_accelerator(),
            Err(ExpanderError::AcceleratorSupport)
        ));
        assert!(!solver.table_is_loaded_on_accelerator());

        let from = [0_i64];
        let request = MomentRequest::new(&from, vec![&from[..]], 8);
        assert!(matches!(
            solver.moments_on_accelerator(&request),
            Err(ExpanderError::AcceleratorSupport)
        ));
    }
}
