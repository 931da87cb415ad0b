//! Mapping between a composite state array and the part of it owned by one
//! set of equations.

use ndarray::prelude::*;

use crate::error::{Error, Result};
use crate::field::{Field, FieldElement};

/// Location of one equation set inside a composite state or derivative array.
///
/// The composite array holds the primary equations followed by every
/// secondary equation set in registration order. A mapper names the
/// contiguous window `first_index..first_index + dimension` of one of them.
/// Mappers are immutable; keeping the windows of sibling mappers disjoint is
/// up to whoever creates them (see [`ExpandableOde`](crate::ExpandableOde)).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EquationsMapper {
    /// Index of the first equation element in complete state arrays.
    first_index: usize,
    /// Dimension of the equation set.
    dimension: usize,
}

impl EquationsMapper {
    pub(crate) fn new(first_index: usize, dimension: usize) -> EquationsMapper {
        EquationsMapper {
            first_index,
            dimension,
        }
    }

    /// Index of the first equation element in complete state arrays.
    pub fn first_index(&self) -> usize {
        self.first_index
    }

    /// Number of elements belonging to the equation set.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Checks that the window fits in an array of length `len` and returns
    /// its end index.
    fn end_within(&self, len: usize) -> Result<usize> {
        match self.first_index.checked_add(self.dimension) {
            Some(end) if end <= len => Ok(end),
            _ => Err(Error::OutOfRange {
                first_index: self.first_index,
                dimension: self.dimension,
                len,
            }),
        }
    }

    /// Extracts the equation data from a complete state or derivative array.
    ///
    /// The result is a new array over the field of `complete[0]`; it shares
    /// nothing with `complete`.
    ///
    /// # Errors
    ///
    /// * [`Error::EmptyComplete`] if `complete` is empty (even for a
    ///   zero-dimensional mapper, since there is no field to build from).
    /// * [`Error::OutOfRange`] if `complete` is shorter than
    ///   `first_index + dimension`.
    pub fn extract_equation_data<T>(&self, complete: ArrayView1<'_, T>) -> Result<Array1<T>>
    where
        T: FieldElement,
    {
        let field = complete.get(0).ok_or(Error::EmptyComplete)?.field();
        let end = self.end_within(complete.len())?;
        let mut equation_data = field.build_array(self.dimension);
        equation_data.assign(&complete.slice(s![self.first_index..end]));
        Ok(equation_data)
    }

    /// Inserts equation data into a complete state or derivative array.
    ///
    /// Only `complete[first_index..first_index + dimension]` is overwritten.
    /// Nothing is written if an error is returned.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfRange`] if `equation_data` has fewer than `dimension`
    ///   elements (reported with `len` set to its length), or if `complete` is
    ///   shorter than `first_index + dimension`.
    /// * [`Error::DimensionMismatch`] if `equation_data` has more than
    ///   `dimension` elements.
    pub fn insert_equation_data<T>(
        &self,
        equation_data: ArrayView1<'_, T>,
        mut complete: ArrayViewMut1<'_, T>,
    ) -> Result<()>
    where
        T: Clone,
    {
        if equation_data.len() < self.dimension {
            return Err(Error::OutOfRange {
                first_index: self.first_index,
                dimension: self.dimension,
                len: equation_data.len(),
            });
        }
        if equation_data.len() > self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: equation_data.len(),
            });
        }
        let end = self.end_within(complete.len())?;
        complete
            .slice_mut(s![self.first_index..end])
            .assign(&equation_data);
        Ok(())
    }
}
