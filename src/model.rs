//! Concrete tight-binding collaborators.
//!
//! The expander only consumes the narrow [`HilbertSpace`] interface; this
//! module provides the CSR-backed lattice models used by the tests, the
//! bench and the examples. Site indices are hierarchical lattice
//! coordinates (`[i]` on a chain, `[ix, iy]` on a square lattice) resolved
//! to flat basis coordinates in row-major order.

use num_complex::Complex;
use sprs::CsMat;

use crate::{error::ExpanderError, hamiltonian::HilbertSpace};

/// A nearest-neighbour tight-binding model on a small lattice.
pub struct TightBindingModel {
    shape: Vec<usize>,
    hamiltonian: CsMat<Complex<f64>>,
}

impl TightBindingModel {
    /// A single isolated level at `energy`.
    pub fn single_site(energy: f64) -> Self {
        let hamiltonian = CsMat::new(
            (1, 1),
            vec![0, 1],
            vec![0],
            vec![Complex::new(energy, 0.)],
        );
        Self {
            shape: vec![1],
            hamiltonian,
        }
    }

    /// A 1D chain of `sites` sites with hopping `-hopping` and on-site
    /// disorder drawn uniformly from `[-disorder/2, disorder/2]`.
    pub fn chain(sites: usize, hopping: f64, disorder: f64, seed: u64) -> Self {
        let mut rng = LcgRng::new(seed);
        let mut row_pointers = Vec::with_capacity(sites + 1);
        let mut column_indices = Vec::new();
        let mut values = Vec::new();

        row_pointers.push(0);
        for site in 0..sites {
            let potential = disorder * (rng.uniform() - 0.5);
            if site > 0 {
                column_indices.push(site - 1);
                values.push(Complex::new(-hopping, 0.));
            }
            column_indices.push(site);
            values.push(Complex::new(potential, 0.));
            if site + 1 < sites {
                column_indices.push(site + 1);
                values.push(Complex::new(-hopping, 0.));
            }
            row_pointers.push(column_indices.len());
        }

        Self {
            shape: vec![sites],
            hamiltonian: CsMat::new((sites, sites), row_pointers, column_indices, values),
        }
    }

    /// A 2D square lattice with open boundaries, hopping `-hopping` and
    /// on-site disorder drawn uniformly from `[-disorder/2, disorder/2]`.
    pub fn square_lattice(lx: usize, ly: usize, hopping: f64, disorder: f64, seed: u64) -> Self {
        let size = lx * ly;
        let mut rng = LcgRng::new(seed);
        let mut row_pointers = Vec::with_capacity(size + 1);
        let mut column_indices = Vec::new();
        let mut values = Vec::new();

        let flat = |ix: usize, iy: usize| ix * ly + iy;

        row_pointers.push(0);
        for ix in 0..lx {
            for iy in 0..ly {
                let potential = disorder * (rng.uniform() - 0.5);
                // Columns in ascending order so the CSR rows are sorted.
                if ix > 0 {
                    column_indices.push(flat(ix - 1, iy));
                    values.push(Complex::new(-hopping, 0.));
                }
                if iy > 0 {
                    column_indices.push(flat(ix, iy - 1));
                    values.push(Complex::new(-hopping, 0.));
                }
                column_indices.push(flat(ix, iy));
                values.push(Complex::new(potential, 0.));
                if iy + 1 < ly {
                    column_indices.push(flat(ix, iy + 1));
                    values.push(Complex::new(-hopping, 0.));
                }
                if ix + 1 < lx {
                    column_indices.push(flat(ix + 1, iy));
                    values.push(Complex::new(-hopping, 0.));
                }
                row_pointers.push(column_indices.len());
            }
        }

        Self {
            shape: vec![lx, ly],
            hamiltonian: CsMat::new((size, size), row_pointers, column_indices, values),
        }
    }

    /// Lattice extent along each hierarchical index direction.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl HilbertSpace for TightBindingModel {
    fn basis_size(&self) -> usize {
        self.hamiltonian.rows()
    }

    fn basis_index(&self, index: &[i64]) -> Result<usize, ExpanderError> {
        if index.iter().any(|&coordinate| coordinate < 0) {
            return Err(ExpanderError::NegativeIndexComponent(index.to_vec()));
        }
        if index.len() != self.shape.len() {
            return Err(ExpanderError::UnknownIndex(index.to_vec()));
        }
        let mut flat = 0_usize;
        for (&coordinate, &extent) in index.iter().zip(self.shape.iter()) {
            let coordinate = coordinate as usize;
            if coordinate >= extent {
                return Err(ExpanderError::UnknownIndex(index.to_vec()));
            }
            flat = flat * extent + coordinate;
        }
        Ok(flat)
    }

    fn hamiltonian(&self) -> &CsMat<Complex<f64>> {
        &self.hamiltonian
    }
}

/// Deterministic LCG for reproducible disorder realisations.
struct LcgRng(u64);

impl LcgRng {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_add(1))
    }

    fn uniform(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1_u64 << 53) as f64
    }
}
