//! ODE systems made of primary equations plus coupled secondary equations.

use log::debug;
use ndarray::prelude::*;

use crate::error::{Error, Result};
use crate::field::{Field, FieldElement};
use crate::mapper::EquationsMapper;

/// First order differential equations `y' = f(t, y)`.
pub trait OdeEquations<T: FieldElement> {
    /// Number of elements in the state.
    fn dimension(&self) -> usize;

    /// Called once before integration starts.
    fn init(&mut self, _t0: f64, _y0: ArrayView1<'_, T>, _final_time: f64) {}

    /// Fills in `y_dot` with the derivative of `y` at time `t`.
    fn compute_derivatives(&mut self, t: f64, y: ArrayView1<'_, T>, y_dot: ArrayViewMut1<'_, T>);
}

/// Equations integrated alongside primary equations, whose derivatives may
/// depend on the primary state and its derivative (e.g. sensitivity
/// equations).
pub trait SecondaryEquations<T: FieldElement> {
    /// Number of elements in the secondary state.
    fn dimension(&self) -> usize;

    /// Called once before integration starts.
    fn init(
        &mut self,
        _t0: f64,
        _primary0: ArrayView1<'_, T>,
        _secondary0: ArrayView1<'_, T>,
        _final_time: f64,
    ) {
    }

    /// Fills in `secondary_dot` with the derivative of `secondary` at time
    /// `t`.
    fn compute_derivatives(
        &mut self,
        t: f64,
        primary: ArrayView1<'_, T>,
        primary_dot: ArrayView1<'_, T>,
        secondary: ArrayView1<'_, T>,
        secondary_dot: ArrayViewMut1<'_, T>,
    );
}

/// State split into its primary and secondary parts.
#[derive(Clone, Debug, PartialEq)]
pub struct OdeState<T> {
    pub time: f64,
    pub primary: Array1<T>,
    /// Secondary states, in registration order.
    pub secondary: Vec<Array1<T>>,
}

/// Primary equations expanded with any number of secondary equation sets.
///
/// The complete state is the primary state followed by each secondary state
/// in registration order. Every equation set gets an [`EquationsMapper`]
/// locating it in the complete state; index 0 is the primary set.
pub struct ExpandableOde<T: FieldElement> {
    primary: Box<dyn OdeEquations<T>>,
    components: Vec<Box<dyn SecondaryEquations<T>>>,
    mappers: Vec<EquationsMapper>,
}

impl<T: FieldElement> ExpandableOde<T> {
    pub fn new<P>(primary: P) -> ExpandableOde<T>
    where
        P: OdeEquations<T> + 'static,
    {
        let mapper = EquationsMapper::new(0, primary.dimension());
        ExpandableOde {
            primary: Box::new(primary),
            components: Vec::new(),
            mappers: vec![mapper],
        }
    }

    /// Registers a secondary equation set after all previously registered
    /// sets, and returns its index (starting at 1).
    pub fn add_secondary_equations<S>(&mut self, secondary: S) -> usize
    where
        S: SecondaryEquations<T> + 'static,
    {
        let first_index = self.total_dimension();
        let mapper = EquationsMapper::new(first_index, secondary.dimension());
        debug!(
            "registering secondary equations {} at {}..{}",
            self.mappers.len(),
            first_index,
            first_index + mapper.dimension(),
        );
        self.components.push(Box::new(secondary));
        self.mappers.push(mapper);
        self.mappers.len() - 1
    }

    /// Mapper of the equation set with index `index` (0 is the primary set).
    pub fn mapper(&self, index: usize) -> Option<&EquationsMapper> {
        self.mappers.get(index)
    }

    pub fn mappers(&self) -> &[EquationsMapper] {
        &self.mappers
    }

    /// Number of registered secondary equation sets.
    pub fn secondary_count(&self) -> usize {
        self.components.len()
    }

    /// Dimension of the complete state.
    pub fn total_dimension(&self) -> usize {
        debug_assert!(self
            .mappers
            .windows(2)
            .all(|w| w[0].first_index() + w[0].dimension() == w[1].first_index()));
        self.mappers
            .last()
            .map_or(0, |last| last.first_index() + last.dimension())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let expected = self.total_dimension();
        if len == expected {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected,
                found: len,
            })
        }
    }

    /// Initializes every equation set, primary first.
    pub fn init(&mut self, t0: f64, y0: ArrayView1<'_, T>, final_time: f64) -> Result<()> {
        self.check_len(y0.len())?;
        let primary0 = self.mappers[0].extract_equation_data(y0)?;
        self.primary.init(t0, primary0.view(), final_time);
        for (component, mapper) in self.components.iter_mut().zip(&self.mappers[1..]) {
            let secondary0 = mapper.extract_equation_data(y0)?;
            component.init(t0, primary0.view(), secondary0.view(), final_time);
        }
        Ok(())
    }

    /// Computes the derivative of the complete state `y` at time `t` into
    /// `y_dot`.
    pub fn compute_derivatives(
        &mut self,
        t: f64,
        y: ArrayView1<'_, T>,
        mut y_dot: ArrayViewMut1<'_, T>,
    ) -> Result<()> {
        self.check_len(y.len())?;
        self.check_len(y_dot.len())?;

        let field = y.get(0).map(FieldElement::field).ok_or(Error::EmptyComplete)?;
        let primary_mapper = self.mappers[0];
        let primary_state = primary_mapper.extract_equation_data(y)?;
        let mut primary_dot = field.build_array(primary_mapper.dimension());
        self.primary
            .compute_derivatives(t, primary_state.view(), primary_dot.view_mut());
        primary_mapper.insert_equation_data(primary_dot.view(), y_dot.view_mut())?;

        for (component, mapper) in self.components.iter_mut().zip(&self.mappers[1..]) {
            let secondary_state = mapper.extract_equation_data(y)?;
            let mut secondary_dot = field.build_array(mapper.dimension());
            component.compute_derivatives(
                t,
                primary_state.view(),
                primary_dot.view(),
                secondary_state.view(),
                secondary_dot.view_mut(),
            );
            mapper.insert_equation_data(secondary_dot.view(), y_dot.view_mut())?;
        }
        Ok(())
    }

    /// Splits a complete state into its primary and secondary parts.
    pub fn map_state(&self, t: f64, y: ArrayView1<'_, T>) -> Result<OdeState<T>> {
        self.check_len(y.len())?;
        let primary = self.mappers[0].extract_equation_data(y)?;
        let secondary = self.mappers[1..]
            .iter()
            .map(|mapper| mapper.extract_equation_data(y))
            .collect::<Result<Vec<_>>>()?;
        Ok(OdeState {
            time: t,
            primary,
            secondary,
        })
    }

    /// Reassembles a complete state from its parts.
    pub fn complete_state(&self, state: &OdeState<T>) -> Result<Array1<T>> {
        if state.secondary.len() != self.components.len() {
            return Err(Error::SecondaryCount {
                expected: self.components.len(),
                found: state.secondary.len(),
            });
        }
        let parts = || std::iter::once(&state.primary).chain(&state.secondary);
        let field = parts()
            .find_map(|part| part.get(0))
            .map(FieldElement::field)
            .ok_or(Error::EmptyComplete)?;
        let mut complete = field.build_array(self.total_dimension());
        for (part, mapper) in parts().zip(&self.mappers) {
            mapper.insert_equation_data(part.view(), complete.view_mut())?;
        }
        Ok(complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y' = -y
    struct Decay;

    impl OdeEquations<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn compute_derivatives(&mut self, _t: f64, y: ArrayView1<f64>, mut y_dot: ArrayViewMut1<f64>) {
            y_dot[0] = -y[0];
        }
    }

    /// Secondary set whose derivative is `t + primary_dot[0] * s`.
    struct Coupled(usize);

    impl SecondaryEquations<f64> for Coupled {
        fn dimension(&self) -> usize {
            self.0
        }

        fn compute_derivatives(
            &mut self,
            t: f64,
            _primary: ArrayView1<f64>,
            primary_dot: ArrayView1<f64>,
            secondary: ArrayView1<f64>,
            mut secondary_dot: ArrayViewMut1<f64>,
        ) {
            for (d, &s) in secondary_dot.iter_mut().zip(secondary) {
                *d = t + primary_dot[0] * s;
            }
        }
    }

    fn expanded() -> ExpandableOde<f64> {
        let mut ode = ExpandableOde::new(Decay);
        assert_eq!(ode.add_secondary_equations(Coupled(2)), 1);
        assert_eq!(ode.add_secondary_equations(Coupled(0)), 2);
        assert_eq!(ode.add_secondary_equations(Coupled(3)), 3);
        ode
    }

    #[test]
    fn offsets_follow_registration_order() {
        let ode = expanded();
        let offsets: Vec<_> = ode
            .mappers()
            .iter()
            .map(|m| (m.first_index(), m.dimension()))
            .collect();
        assert_eq!(offsets, vec![(0, 1), (1, 2), (3, 0), (3, 3)]);
        assert_eq!(ode.total_dimension(), 6);
        assert_eq!(ode.secondary_count(), 3);
        assert!(ode.mapper(4).is_none());
    }

    #[test]
    fn derivatives_are_assembled_per_set() {
        let mut ode = expanded();
        let y = array![2., 1., 2., 3., 4., 5.];
        let mut y_dot = Array1::<f64>::zeros(6);
        ode.compute_derivatives(0.5, y.view(), y_dot.view_mut())
            .unwrap();
        assert_eq!(y_dot, array![-2., -1.5, -3.5, -5.5, -7.5, -9.5]);
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let mut ode = expanded();
        let mut y_dot = Array1::<f64>::zeros(6);
        assert_eq!(
            ode.compute_derivatives(0., Array1::<f64>::zeros(5).view(), y_dot.view_mut()),
            Err(Error::DimensionMismatch {
                expected: 6,
                found: 5
            }),
        );
        assert_eq!(
            ode.init(0., Array1::<f64>::zeros(7).view(), 1.),
            Err(Error::DimensionMismatch {
                expected: 6,
                found: 7
            }),
        );
    }

    #[test]
    fn map_and_complete_state() {
        let ode = expanded();
        let y = array![1., 2., 3., 4., 5., 6.];
        let state = ode.map_state(3., y.view()).unwrap();
        assert_eq!(state.time, 3.);
        assert_eq!(state.primary, array![1.]);
        assert_eq!(
            state.secondary,
            vec![array![2., 3.], Array1::zeros(0), array![4., 5., 6.]],
        );
        assert_eq!(ode.complete_state(&state).unwrap(), y);

        let mut truncated = state;
        truncated.secondary.pop();
        assert_eq!(
            ode.complete_state(&truncated),
            Err(Error::SecondaryCount {
                expected: 3,
                found: 2
            }),
        );
    }
}
