//! Adaptive ODE solvers over composite states made of primary equations and
//! any number of secondary equation sets, generic over the numeric field of
//! the state elements.

pub mod dual;
pub mod error;
pub mod expandable;
pub mod field;
pub mod mapper;
pub mod rk;

pub use crate::error::{Error, Result};
pub use crate::expandable::{ExpandableOde, OdeEquations, OdeState, SecondaryEquations};
pub use crate::field::{Field, FieldElement, RealField};
pub use crate::mapper::EquationsMapper;

use ndarray::prelude::*;

pub trait OdeIntegrate<T> {
    /// Returns the number of elements in the state.
    fn len(&self) -> usize;
    /// Perform one step (adaptive step size).
    fn step(&mut self) -> Result<()>;
    /// Current time.
    fn time(&self) -> f64;
    /// The ending time.
    fn time_bound(&self) -> f64;
    /// Current complete state.
    fn state(&self) -> ArrayView1<'_, T>;
    /// Returns `true` if the integration has reached `time_bound`.
    fn finished(&self) -> bool {
        self.time() == self.time_bound()
    }
    /// Integrate until reaching `time_bound`.
    fn run_to_bound(&mut self) -> Result<()> {
        while !self.finished() {
            self.step()?;
        }
        Ok(())
    }
}
