//! The error surface of the crate.

use miette::Diagnostic;

/// Error surface for the expander.
///
/// Everything here is a configuration error in the sense of the solver
/// contract: the offending call is aborted, nothing is retried and no
/// partial result is ever returned.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum ExpanderError {
    /// The scale factor does not define a usable rescaling of the spectrum.
    #[error("scale factor {0} is invalid: it must be finite and positive")]
    InvalidScaleFactor(f64),
    /// A scale factor was never supplied to the builder.
    #[error("no scale factor was supplied; there is no safe model-independent default")]
    MissingScaleFactor,
    /// An index contained a negative coordinate.
    #[error("index {0:?} contains a negative coordinate")]
    NegativeIndexComponent(Vec<i64>),
    /// An index did not resolve to a basis state.
    #[error("index {0:?} does not resolve to a basis state")]
    UnknownIndex(Vec<i64>),
    /// Zero Chebyshev coefficients were requested.
    #[error("requested {0} Chebyshev coefficients; at least one is required")]
    InvalidCoefficientCount(usize),
    /// A negative broadening was requested.
    #[error("broadening {0} is negative")]
    NegativeBroadening(f64),
    /// A negative component cutoff was requested.
    #[error("component cutoff {0} is negative")]
    NegativeCutoff(f64),
    /// The damping mask does not cover the Hilbert space.
    #[error("damping mask has {mask} entries but the basis has {basis} states")]
    DampingMaskLength {
        /// Number of entries in the supplied mask.
        mask: usize,
        /// Size of the Hilbert-space basis.
        basis: usize,
    },
    /// The energy grid is malformed.
    #[error("invalid energy grid: {0}")]
    InvalidEnergyGrid(String),
    /// The energy window leaves the rescaled spectral domain.
    #[error(
        "energy bounds [{lower}, {upper}] must lie within [-{scale_factor}, {scale_factor}]"
    )]
    BoundsOutsideSpectrum {
        /// Requested lower bound.
        lower: f64,
        /// Requested upper bound.
        upper: f64,
        /// Scale factor of the expander.
        scale_factor: f64,
    },
    /// A cached reconstruction was requested with no table generated.
    #[error("no generating-function lookup table has been generated")]
    MissingTable,
    /// The moment set does not match the lookup table key.
    #[error("lookup table holds {expected} coefficients but the moment set holds {requested}")]
    TableKeyMismatch {
        /// Coefficient count of the generated table.
        expected: usize,
        /// Coefficient count of the moment set.
        requested: usize,
    },
    /// Moments and reconstruction disagree on the spectral rescaling.
    #[error(
        "moments were generated with scale factor {moments} but reconstruction uses {reconstruction}"
    )]
    ScaleFactorMismatch {
        /// Scale factor recorded on the moment set.
        moments: f64,
        /// Scale factor of the reconstructing side.
        reconstruction: f64,
    },
    /// Accelerator entry point called in a build without accelerator support.
    #[error("accelerator support was not compiled in; enable the `accelerator` feature")]
    AcceleratorSupport,
    /// Accelerator entry point called before attaching an accelerator.
    #[error("no accelerator is attached to this expander")]
    AcceleratorNotAttached,
    /// The cutoff path only exists on the host.
    #[error("the component cutoff path is not implemented on the accelerator")]
    CutoffOnAccelerator,
    /// The lookup table was never mirrored to the accelerator.
    #[error("the lookup table is not loaded on the accelerator")]
    AcceleratorTableNotLoaded,
    /// A device-side failure.
    #[error("accelerator failure: {0}")]
    Accelerator(String),
}
