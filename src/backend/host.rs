//! Host execution: the rayon-parallel recursion sweep.

use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;
use std::sync::Arc;

use crate::{
    damping::DampingMask,
    error::ExpanderError,
    expander::{
        greens::{self, GreensFunctionKind},
        moments::MomentVector,
        table::GeneratingFunctionTable,
    },
    hamiltonian::{ApplyHamiltonian, ScaledHamiltonian},
};

use super::ComputeBackend;

/// The CPU backend. Always available; holds at most a shared reference to
/// the generated lookup table.
pub(crate) struct HostBackend {
    table: Option<Arc<GeneratingFunctionTable>>,
}

impl HostBackend {
    pub(crate) fn new() -> Self {
        Self { table: None }
    }
}

impl ComputeBackend for HostBackend {
    fn moment_sweep(
        &self,
        hamiltonian: &ScaledHamiltonian<'_>,
        damping: Option<&DampingMask>,
        from: usize,
        to: &[usize],
        num_coefficients: usize,
        cutoff: Option<f64>,
    ) -> Result<Array2<Complex<f64>>, ExpanderError> {
        Ok(moment_sweep(
            hamiltonian,
            damping,
            from,
            to,
            num_coefficients,
            cutoff,
        ))
    }

    fn upload_table(
        &mut self,
        table: &Arc<GeneratingFunctionTable>,
    ) -> Result<(), ExpanderError> {
        self.table = Some(Arc::clone(table));
        Ok(())
    }

    fn invalidate_table(&mut self) {
        self.table = None;
    }

    fn table_is_loaded(&self) -> bool {
        self.table.is_some()
    }

    fn reconstruct_cached(
        &self,
        moments: &MomentVector<'_>,
        kind: GreensFunctionKind,
    ) -> Result<Vec<Complex<f64>>, ExpanderError> {
        let table = self.table.as_ref().ok_or(ExpanderError::MissingTable)?;
        greens::reconstruct_cached(moments, kind, table)
    }
}

/// One shared recursion sweep over every observation coordinate.
///
/// Builds the Chebyshev vector sequence `v_0 = e_from`, `v_1 = H̃ v_0`,
/// `v_{k+1} = 2 H̃ v_k - v_{k-1}` and records `moments[m][k] = v_k[to[m]]`
/// at each order. Three vectors of the basis dimension are held at any
/// time regardless of the number of observations; the damping mask, when
/// present, multiplies every freshly applied vector before it enters the
/// combination.
pub(crate) fn moment_sweep<A: ApplyHamiltonian + ?Sized>(
    operator: &A,
    damping: Option<&DampingMask>,
    from: usize,
    to: &[usize],
    num_coefficients: usize,
    cutoff: Option<f64>,
) -> Array2<Complex<f64>> {
    let basis_size = operator.basis_size();
    debug_assert!(from < basis_size);
    debug_assert!(to.iter().all(|&t| t < basis_size));

    let apply = |x: &[Complex<f64>], y: &mut [Complex<f64>]| match cutoff {
        Some(cutoff) => operator.apply_into_with_cutoff(x, y, cutoff),
        None => operator.apply_into(x, y),
    };

    let mut moments = Array2::zeros((to.len(), num_coefficients));

    let mut previous = vec![Complex::new(0., 0.); basis_size];
    previous[from] = Complex::new(1., 0.);
    for (observation, &target) in to.iter().enumerate() {
        moments[[observation, 0]] = previous[target];
    }
    if num_coefficients == 1 {
        return moments;
    }

    let mut current = vec![Complex::new(0., 0.); basis_size];
    apply(&previous, &mut current);
    if let Some(mask) = damping {
        mask.apply(&mut current);
    }
    for (observation, &target) in to.iter().enumerate() {
        moments[[observation, 1]] = current[target];
    }

    let mut scratch = vec![Complex::new(0., 0.); basis_size];
    for order in 2..num_coefficients {
        apply(&current, &mut scratch);
        if let Some(mask) = damping {
            mask.apply(&mut scratch);
        }
        previous
            .par_iter_mut()
            .zip(scratch.par_iter())
            .for_each(|(previous, &applied)| {
                *previous = applied * 2. - *previous;
            });
        std::mem::swap(&mut previous, &mut current);
        for (observation, &target) in to.iter().enumerate() {
            moments[[observation, order]] = current[target];
        }
    }

    moments
}
