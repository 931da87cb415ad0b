//! Numeric fields the solvers can work over.
//!
//! State arrays are generic over a [`FieldElement`] type. Every element knows
//! which [`Field`] it belongs to, and a field knows how to allocate valid
//! arrays of its elements. This is what lets the solvers build correctly typed
//! result arrays from an existing state without knowing the concrete numeric
//! representation (plain `f64`, dual numbers carrying derivatives, ...).

use ndarray::prelude::*;
use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

/// An algebraic field of elements.
pub trait Field: Clone + PartialEq + Debug {
    type Element: Clone;

    /// Additive identity.
    fn zero(&self) -> Self::Element;

    /// Multiplicative identity.
    fn one(&self) -> Self::Element;

    /// Embeds a real constant into the field.
    fn constant(&self, value: f64) -> Self::Element;

    /// Allocates an array of `len` valid elements of this field (zeros).
    fn build_array(&self, len: usize) -> Array1<Self::Element> {
        Array1::from_elem(len, self.zero())
    }
}

/// An element of a [`Field`].
pub trait FieldElement:
    Clone + Debug + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + Neg<Output = Self>
{
    type Field: Field<Element = Self>;

    /// Returns the field this element belongs to.
    fn field(&self) -> Self::Field;

    /// Real part of the element, used for error norms and step size control.
    fn real(&self) -> f64;

    /// Multiplies the element by a real factor.
    fn scale(&self, factor: f64) -> Self;
}

/// The field of `f64` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RealField;

impl Field for RealField {
    type Element = f64;

    fn zero(&self) -> f64 {
        0.
    }

    fn one(&self) -> f64 {
        1.
    }

    fn constant(&self, value: f64) -> f64 {
        value
    }
}

impl FieldElement for f64 {
    type Field = RealField;

    fn field(&self) -> RealField {
        RealField
    }

    fn real(&self) -> f64 {
        *self
    }

    fn scale(&self, factor: f64) -> f64 {
        self * factor
    }
}
