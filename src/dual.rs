//! Forward-mode dual numbers.
//!
//! A [`Dual`] carries a value together with its partial derivatives with
//! respect to a fixed number of parameters. The number of parameters is part
//! of the field identity, so arrays built from an inspected element have the
//! right derivative width.

use ndarray::prelude::*;
use std::ops::{Add, Mul, Neg, Sub};

use crate::field::{Field, FieldElement};

/// Field of dual numbers with `parameters` derivative components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DualField {
    parameters: usize,
}

impl DualField {
    pub fn new(parameters: usize) -> DualField {
        DualField { parameters }
    }

    /// Number of parameters derivatives are tracked for.
    pub fn parameters(&self) -> usize {
        self.parameters
    }

    /// Returns the independent variable with index `index` at `value`, i.e. a
    /// dual number whose derivative is 1 for `index` and 0 otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.parameters()`.
    pub fn variable(&self, index: usize, value: f64) -> Dual {
        assert!(
            index < self.parameters,
            "variable index {} out of range for {} parameters",
            index,
            self.parameters,
        );
        let mut derivatives = Array1::zeros(self.parameters);
        derivatives[index] = 1.;
        Dual { value, derivatives }
    }
}

impl Field for DualField {
    type Element = Dual;

    fn zero(&self) -> Dual {
        self.constant(0.)
    }

    fn one(&self) -> Dual {
        self.constant(1.)
    }

    fn constant(&self, value: f64) -> Dual {
        Dual {
            value,
            derivatives: Array1::zeros(self.parameters),
        }
    }
}

/// Dual number: a value and its gradient with respect to the field's parameters.
///
/// Arithmetic between duals of different fields panics, since their gradients
/// have different lengths.
#[derive(Clone, Debug, PartialEq)]
pub struct Dual {
    value: f64,
    derivatives: Array1<f64>,
}

impl Dual {
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Partial derivative with respect to parameter `index`.
    pub fn derivative(&self, index: usize) -> f64 {
        self.derivatives[index]
    }

    pub fn derivatives(&self) -> ArrayView1<'_, f64> {
        self.derivatives.view()
    }
}

impl FieldElement for Dual {
    type Field = DualField;

    fn field(&self) -> DualField {
        DualField::new(self.derivatives.len())
    }

    fn real(&self) -> f64 {
        self.value
    }

    fn scale(&self, factor: f64) -> Dual {
        Dual {
            value: self.value * factor,
            derivatives: &self.derivatives * factor,
        }
    }
}

impl Add for Dual {
    type Output = Dual;

    fn add(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value + rhs.value,
            derivatives: self.derivatives + rhs.derivatives,
        }
    }
}

impl Sub for Dual {
    type Output = Dual;

    fn sub(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value - rhs.value,
            derivatives: self.derivatives - rhs.derivatives,
        }
    }
}

impl Mul for Dual {
    type Output = Dual;

    fn mul(self, rhs: Dual) -> Dual {
        // Product rule.
        let derivatives = &self.derivatives * rhs.value + &rhs.derivatives * self.value;
        Dual {
            value: self.value * rhs.value,
            derivatives,
        }
    }
}

impl Neg for Dual {
    type Output = Dual;

    fn neg(self) -> Dual {
        Dual {
            value: -self.value,
            derivatives: -self.derivatives,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_is_derived_from_element() {
        let field = DualField::new(3);
        let x = field.variable(1, 2.);
        assert_eq!(x.field(), field);
        let arr = x.field().build_array(2);
        assert_eq!(arr.len(), 2);
        assert!(arr.iter().all(|d| d.value() == 0. && d.derivatives().len() == 3));
    }

    #[test]
    fn product_rule() {
        let field = DualField::new(2);
        let x = field.variable(0, 3.);
        let y = field.variable(1, 5.);
        // f = x * y - x
        let f = x.clone() * y - x;
        assert_eq!(f.value(), 12.);
        assert_eq!(f.derivative(0), 4.);
        assert_eq!(f.derivative(1), 3.);
    }

    #[test]
    fn scale_and_negate() {
        let field = DualField::new(1);
        let x = -field.variable(0, 2.).scale(1.5);
        assert_eq!(x.value(), -3.);
        assert_eq!(x.derivative(0), -1.5);
    }

    #[test]
    #[should_panic]
    fn variable_index_out_of_range() {
        DualField::new(2).variable(2, 0.);
    }
}
