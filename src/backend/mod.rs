//! Execution backends for the moment sweep and cached reconstruction.
//!
//! The expander drives either the host backend (rayon over CSR rows) or,
//! behind the `accelerator` feature, a wgpu compute backend with `f64`
//! shader support. Both produce bit-identical contracts: a moment matrix
//! of shape `(observations, coefficients)` from a single shared recursion
//! sweep, and a cached reconstruction against a mirrored lookup table.

use ndarray::Array2;
use num_complex::Complex;
use std::sync::Arc;

use crate::{
    damping::DampingMask,
    error::ExpanderError,
    expander::{
        greens::GreensFunctionKind,
        moments::MomentVector,
        table::GeneratingFunctionTable,
    },
    hamiltonian::ScaledHamiltonian,
};

pub(crate) mod host;
#[cfg(feature = "accelerator")]
pub(crate) mod device;

pub(crate) use host::HostBackend;
#[cfg(feature = "accelerator")]
pub(crate) use device::DeviceBackend;

/// A place the recursion sweep and cached reconstruction can run.
pub(crate) trait ComputeBackend {
    /// Run the three-term recursion once, projecting onto every
    /// observation coordinate in `to` at each order.
    fn moment_sweep(
        &self,
        hamiltonian: &ScaledHamiltonian<'_>,
        damping: Option<&DampingMask>,
        from: usize,
        to: &[usize],
        num_coefficients: usize,
        cutoff: Option<f64>,
    ) -> Result<Array2<Complex<f64>>, ExpanderError>;

    /// Mirror a generated lookup table onto this backend.
    fn upload_table(
        &mut self,
        table: &Arc<GeneratingFunctionTable>,
    ) -> Result<(), ExpanderError>;

    /// Drop any mirrored lookup table.
    fn invalidate_table(&mut self);

    /// Whether a lookup table is currently mirrored.
    fn table_is_loaded(&self) -> bool;

    /// Contract the moment vector against the mirrored table.
    fn reconstruct_cached(
        &self,
        moments: &MomentVector<'_>,
        kind: GreensFunctionKind,
    ) -> Result<Vec<Complex<f64>>, ExpanderError>;
}
