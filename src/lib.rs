// Copyright 2022 kpm-greens authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Chebyshev-expansion Green's functions for sparse Hamiltonians.
//!
//! This crate computes single-particle Green's functions of large sparse
//! tight-binding Hamiltonians by the kernel polynomial method. The
//! calculation splits in two: a recursion sweep expands the resolvent of
//! the rescaled Hamiltonian into Chebyshev moments, touching the matrix
//! only through sparse matrix-vector products, and a reconstruction step
//! contracts those moments with a damped generating function on an
//! energy grid. Moments are the expensive part and depend only on the
//! Hamiltonian; they can be reconstructed into retarded, advanced,
//! principal or non-principal functions at any broadening without being
//! recomputed.
//!
//! The sweep runs in parallel over matrix rows on the host, or on a GPU
//! through the optional `accelerator` feature when an adapter with
//! double-precision shader support is available.
//!
//! ```
//! use kpm_greens::{
//!     ChebyshevExpanderBuilder, EnergyGrid, GreensFunctionKind, MomentRequest,
//!     TightBindingModel,
//! };
//!
//! # fn main() -> Result<(), kpm_greens::ExpanderError> {
//! let model = TightBindingModel::chain(64, 1., 0., 0);
//! let solver = ChebyshevExpanderBuilder::new()
//!     .with_space(&model)
//!     .with_scale_factor(2.5)
//!     .build()?;
//!
//! // Moments of one source site onto itself, 256 orders deep.
//! let site = [32_i64];
//! let request = MomentRequest::new(&site, vec![&site[..]], 256).with_broadening(0.05);
//! let moments = solver.moments(&request)?;
//!
//! let grid = EnergyGrid::new(-2.4, 2.4, 128)?;
//! let green = solver.greens_function(
//!     &moments.observation(0),
//!     GreensFunctionKind::Retarded,
//!     grid,
//! )?;
//! assert_eq!(green.len(), 128);
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

mod backend;
pub mod damping;
pub mod error;
pub mod expander;
pub mod hamiltonian;
pub mod model;

pub use damping::{monolopoulos_abc_damping, DampingMask};
pub use error::ExpanderError;
pub use expander::{
    ChebyshevExpander, ChebyshevExpanderBuilder, EnergyGrid, GeneratingFunctionTable,
    GreensFunctionKind, MomentRequest, MomentSet, MomentVector, TableKey,
};
pub use hamiltonian::{ApplyHamiltonian, HilbertSpace, ScaledHamiltonian};
pub use model::TightBindingModel;
