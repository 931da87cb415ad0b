//! Error type shared by the mapper, the expandable ODE and the solvers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The composite array was empty, so there is no element whose field
    /// could be inspected.
    #[error("cannot determine field from an empty array")]
    EmptyComplete,

    /// The window `first_index..first_index + dimension` does not fit in the
    /// composite array, or the equation data has fewer than `dimension`
    /// elements. `len` is the length of the offending array.
    #[error(
        "equation range {first_index}..{first_index}+{dimension} is out of range for array of \
         length {len}"
    )]
    OutOfRange {
        first_index: usize,
        dimension: usize,
        len: usize,
    },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("expected {expected} secondary states, found {found}")]
    SecondaryCount { expected: usize, found: usize },

    #[error("no equation set with index {index} ({count} registered)")]
    UnknownEquationSet { index: usize, count: usize },

    #[error("t_bound is not finite")]
    TimeBoundNotFinite,

    #[error("max_step is zero or negative")]
    MaxStepZeroOrNeg,

    #[error("array arguments have unequal lengths")]
    UnequalLengths,

    /// The relative tolerance was too small.
    ///
    /// It must be at least `100. * f64::EPSILON`.
    #[error("rtol is too small")]
    TooSmallRelTol,

    #[error("required step size {required} is smaller than min allowable step size {allowable}")]
    TooSmallStep { required: f64, allowable: f64 },
}
