//! Runge–Kutta solvers.

use lazy_static::lazy_static;
use log::{debug, trace};
use ndarray::prelude::*;
use ndarray::{FoldWhile, Zip};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::expandable::{ExpandableOde, OdeState};
use crate::field::{Field, FieldElement};
use crate::OdeIntegrate;

/// Multiply steps computed from asymptotic behaviour of errors by this.
const SAFETY: f64 = 0.9;
/// Minimum allowed decrease in a step size.
const MIN_FACTOR: f64 = 0.2;
/// Maximum allowed increase in a step size.
const MAX_FACTOR: f64 = 10.;

/// Computes RMS norm of the real parts of scaled values.
fn norm<T: FieldElement>(x: ArrayView1<'_, T>, scale: ArrayView1<'_, f64>) -> f64 {
    debug_assert_eq!(x.len(), scale.len());
    let len = x.len();
    (Zip::from(x)
        .and(scale)
        .fold_while(0., |acc, x, &scale| {
            let scaled = x.real() / scale;
            FoldWhile::Continue(acc + scaled * scaled)
        })
        .into_inner()
        / len as f64)
        .sqrt()
}

/// Returns `base + h * Σ coeffs[i] * stages[i]`.
fn combine<'s, T, I>(base: &Array1<T>, stages: I, coeffs: ArrayView1<'_, f64>, h: f64) -> Array1<T>
where
    T: FieldElement + 's,
    I: IntoIterator<Item = &'s Array1<T>>,
{
    let mut out = base.clone();
    for (stage, &coeff) in stages.into_iter().zip(coeffs) {
        if coeff != 0. {
            Zip::from(&mut out)
                .and(stage)
                .apply(|out, stage| *out = out.clone() + stage.scale(coeff * h));
        }
    }
    out
}

/// Empirically select a good initial step.
///
/// The algorithm is described in (ref 1).
///
/// # Parameters
///
/// * ode: Right-hand side of the system.
/// * t0: Initial value of the independent variable.
/// * y0: Initial value of the dependent variable.
/// * f0: Initial value of the derivative, i.e. the result of evaluating
///   `ode` at `t0` and `y0`.
/// * direction: Integration direction.
/// * order: Method order.
/// * rtol: Desired relative tolerance.
/// * atol: Desired absolute tolerance.
///
/// # Returns
///
/// Absolute value of the suggested initial step.
///
/// # References
///
/// 1. E. Hairer, S. P. Norsett G. Wanner, "Solving Ordinary Differential
///    Equations I: Nonstiff Problems", Sec. II.4.
fn select_initial_step<T: FieldElement>(
    ode: &mut ExpandableOde<T>,
    t0: f64,
    y0: ArrayView1<'_, T>,
    f0: ArrayView1<'_, T>,
    direction: f64,
    order: usize,
    rtol: ArrayView1<'_, f64>,
    atol: ArrayView1<'_, f64>,
) -> Result<f64> {
    let scale = y0.mapv(|y| y.real().abs()) * rtol + atol;
    let d0 = norm(y0, scale.view());
    let d1 = norm(f0, scale.view());
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };

    let mut y1 = y0.to_owned();
    Zip::from(&mut y1)
        .and(f0)
        .apply(|y1, f0| *y1 = y1.clone() + f0.scale(h0 * direction));
    let mut f1 = y0[0].field().build_array(y0.len());
    ode.compute_derivatives(t0 + h0 * direction, y1.view(), f1.view_mut())?;
    Zip::from(&mut f1)
        .and(f0)
        .apply(|f1, f0| *f1 = f1.clone() - f0.clone());
    let d2 = norm(f1.view(), scale.view()) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1. / (order as f64 + 1.))
    };

    Ok((100. * h0).min(h1))
}

/// Runge–Kutta ODE IVP solver over an [`ExpandableOde`].
///
/// The state can be made of elements of any [`FieldElement`] type; error
/// control only looks at their real parts.
pub struct RungeKutta<T, O>
where
    T: FieldElement,
    O: RKMethod,
{
    ode: ExpandableOde<T>,
    method: PhantomData<O>,
    /// Field of the state elements.
    field: T::Field,
    /// Current time.
    t: f64,
    /// Current state.
    y: Array1<T>,
    /// Current state derivative.
    f: Array1<T>,
    /// Previous time, or `None` if there haven't been any steps.
    t_old: Option<f64>,
    /// Previous state, or `None` if there haven't been any steps.
    y_old: Option<Array1<T>>,
    /// Boundary time.
    t_bound: f64,
    /// Integration direction: +1 or -1.
    direction: f64,
    /// Maximum step size.
    ///
    /// Can be NAN or INFINITY to indicate that the step is not bounded and is
    /// determined solely by the solver.
    max_step: f64,
    /// Initial step size for next `.step()`.
    h_abs: f64,
    /// Relative tolerance.
    rtol: Array1<f64>,
    /// Absolute tolerance.
    atol: Array1<f64>,
    /// Storage for the `O::NUM_STAGES` Runge Kutta stages.
    k: Vec<Array1<T>>,
}

struct StepOutput<T> {
    /// Solution at `t + h` computed with higher accuracy.
    y_new: Array1<T>,
    /// Derivative at `t + h` and `y_new`.
    f_new: Array1<T>,
    /// Error estimate of less accurate method.
    error: Array1<T>,
}

impl<T, O> RungeKutta<T, O>
where
    T: FieldElement,
    O: RKMethod,
{
    /// Creates a new `RungeKutta` solver.
    ///
    /// # Parameters
    ///
    /// * `ode`: Right-hand side of the system, primary equations together with
    ///   their secondary equations. It is initialized here.
    ///
    /// * `t0`: Initial value of the independent variable.
    ///
    /// * `y0`: Initial values of the complete state (primary state followed by
    ///   the secondary states).
    ///
    /// * `t_bound`: Boundary time — the integration won't continue beyond
    ///   it. It also determines the direction of the integration.
    ///
    /// * `max_step`: Maximum allowed step size.
    ///
    /// * `rtol`, `atol`: Relative and absolute tolerances. The solver keeps
    ///   the local error estimates less than `atol + rtol * abs(y)`. Here
    ///   `rtol` controls a relative accuracy (number of correct digits). But
    ///   if a component of `y` is approximately below `atol` then the error
    ///   only needs to fall within the same `atol` threshold, and the number
    ///   of correct digits is not guaranteed. If components of y have
    ///   different scales, it might be beneficial to set different `atol`
    ///   values for different components.
    pub fn new(
        mut ode: ExpandableOde<T>,
        t0: f64,
        y0: Array1<T>,
        t_bound: f64,
        max_step: f64,
        rtol: Array1<f64>,
        atol: Array1<f64>,
    ) -> Result<RungeKutta<T, O>> {
        if !t_bound.is_finite() {
            return Err(Error::TimeBoundNotFinite);
        }
        if max_step <= 0. {
            return Err(Error::MaxStepZeroOrNeg);
        }
        if y0.len() != rtol.len() || y0.len() != atol.len() {
            return Err(Error::UnequalLengths);
        }
        if rtol.iter().any(|&tol| tol < 100. * f64::EPSILON) {
            return Err(Error::TooSmallRelTol);
        }
        let field = y0
            .get(0)
            .map(FieldElement::field)
            .ok_or(Error::EmptyComplete)?;

        let direction = if t_bound < t0 { -1. } else { 1. };

        ode.init(t0, y0.view(), t_bound)?;
        let mut f = field.build_array(y0.len());
        ode.compute_derivatives(t0, y0.view(), f.view_mut())?;

        // Determine initial step size.
        let h_abs = select_initial_step(
            &mut ode,
            t0,
            y0.view(),
            f.view(),
            direction,
            O::ORDER,
            rtol.view(),
            atol.view(),
        )?;

        let k = vec![field.build_array(y0.len()); O::NUM_STAGES];

        Ok(RungeKutta {
            ode,
            method: PhantomData,
            field,
            t: t0,
            y: y0,
            f,
            t_old: None,
            y_old: None,
            t_bound,
            direction,
            max_step,
            h_abs,
            rtol,
            atol,
            k,
        })
    }

    /// Current state derivative.
    pub fn state_deriv(&self) -> ArrayView1<'_, T> {
        self.f.view()
    }

    /// State before the last successful step, or `None` if no steps were made
    /// yet.
    pub fn previous_state(&self) -> Option<ArrayView1<'_, T>> {
        self.y_old.as_ref().map(|y| y.view())
    }

    /// Size of last successful step or `None` if no steps were made yet.
    pub fn step_size(&self) -> Option<f64> {
        self.t_old.map(|t_old| (self.t - t_old).abs())
    }

    pub fn ode(&self) -> &ExpandableOde<T> {
        &self.ode
    }

    /// Current state split into primary and secondary parts.
    pub fn map_state(&self) -> Result<OdeState<T>> {
        self.ode.map_state(self.t, self.y.view())
    }

    /// Current state of the equation set with index `index` (0 is the primary
    /// set, secondary sets are numbered from 1 in registration order).
    pub fn equation_state(&self, index: usize) -> Result<Array1<T>> {
        let mapper = self.ode.mapper(index).ok_or(Error::UnknownEquationSet {
            index,
            count: self.ode.mappers().len(),
        })?;
        mapper.extract_equation_data(self.y.view())
    }

    /// Perform a single Runge–Kutta step.
    ///
    /// This function computes a prediction of an explicit Runge–Kutta method and
    /// also estimates the error of a less accurate method. The stored
    /// derivative `self.f` is left untouched so that a rejected step can be
    /// retried.
    /// Notation for Butcher tableau is as in (ref 1).
    ///
    /// # References
    ///
    /// 1. E. Hairer, S. P. Norsett G. Wanner, "Solving Ordinary Differential
    ///    Equations I: Nonstiff Problems", Sec. II.4.
    fn step_by(&mut self, h: f64) -> Result<StepOutput<T>> {
        self.k[0].assign(&self.f);
        for (s, (a, &c)) in O::a().iter().zip(O::c()).enumerate() {
            let y_stage = combine(&self.y, &self.k[..s + 1], a.view(), h);
            self.ode
                .compute_derivatives(self.t + c * h, y_stage.view(), self.k[s + 1].view_mut())?;
        }

        let y_new = combine(&self.y, &self.k, O::b(), h);
        let mut f_new = self.field.build_array(self.y.len());
        self.ode
            .compute_derivatives(self.t + h, y_new.view(), f_new.view_mut())?;

        let zeros = self.field.build_array(self.y.len());
        let error = combine(
            &zeros,
            self.k.iter().chain(std::iter::once(&f_new)),
            O::e(),
            h,
        );

        Ok(StepOutput {
            y_new,
            f_new,
            error,
        })
    }
}

/// Computes the next representable floating-point value following `x` in the
/// direction of `y`.
///
/// Special cases:
///
/// * If `x` equals `y`, then `y` is returned.
/// * If `x` or `y` is NAN, a NAN is returned.
///
/// There is no special handling for overflow of finite values to ±∞ or
/// subnormals.
fn next_after(x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() {
        f64::NAN
    } else if x == y {
        y
    } else if x == 0. {
        if y < 0. {
            -f64::from_bits(1)
        } else {
            f64::from_bits(1)
        }
    } else if (y > x) == (x > 0.) {
        f64::from_bits(x.to_bits().wrapping_add(1))
    } else {
        f64::from_bits(x.to_bits().wrapping_sub(1))
    }
}

impl<T, O> OdeIntegrate<T> for RungeKutta<T, O>
where
    T: FieldElement,
    O: RKMethod,
{
    fn len(&self) -> usize {
        self.y.len()
    }

    fn step(&mut self) -> Result<()> {
        let min_step = 10. * (next_after(self.t, self.direction * f64::INFINITY) - self.t).abs();
        let exponent = -1. / (O::ORDER as f64 + 1.);

        let mut h_abs = self.h_abs.min(self.max_step).max(min_step);

        let mut scale = Array1::<f64>::zeros(self.y.len());
        loop {
            // Update `h_abs` and calculate `t_new` and `h`.
            if h_abs < min_step {
                return Err(Error::TooSmallStep {
                    required: h_abs,
                    allowable: min_step,
                });
            }
            let t_new = if h_abs >= (self.t_bound - self.t).abs() {
                self.t_bound
            } else {
                self.t + h_abs * self.direction
            };
            let h = t_new - self.t;
            h_abs = h.abs();

            // Perform step and calculate error norm.
            let StepOutput {
                y_new,
                f_new,
                error,
            } = self.step_by(h)?;
            Zip::from(&mut scale)
                .and(&self.y)
                .and(&y_new)
                .and(&self.atol)
                .and(&self.rtol)
                .apply(|scale, y, y_new, &atol, &rtol| {
                    *scale = atol + y.real().abs().max(y_new.real().abs()) * rtol;
                });
            let error_norm = norm(error.view(), scale.view());

            // Accept or reject step based on error norm.
            if error_norm < 1. {
                trace!(
                    "accepted step {} -> {} (error norm {})",
                    self.t,
                    t_new,
                    error_norm,
                );
                self.t_old = Some(self.t);
                self.t = t_new;
                self.y_old = Some(std::mem::replace(&mut self.y, y_new));
                self.f = f_new;
                self.h_abs = h_abs * MAX_FACTOR.min((SAFETY * error_norm.powf(exponent)).max(1.));
                return Ok(());
            } else {
                debug!(
                    "rejected step of size {} at t = {} (error norm {})",
                    h_abs, self.t, error_norm,
                );
                h_abs *= MIN_FACTOR.max(SAFETY * error_norm.powf(exponent));
            }
        }
    }

    fn time(&self) -> f64 {
        self.t
    }

    fn time_bound(&self) -> f64 {
        self.t_bound
    }

    fn state(&self) -> ArrayView1<'_, T> {
        self.y.view()
    }
}

pub trait RKMethod {
    /// Order of the method.
    const ORDER: usize;

    /// Number of stages in the method.
    const NUM_STAGES: usize;

    /// Coefficients for incrementing time for consecutive RK stages, length
    /// `NUM_STAGES - 1`.
    ///
    /// The value for the first stage is always zero, so it is not included.
    fn c() -> ArrayView1<'static, f64>;

    /// Coefficients for combining previous RK stages to compute the next
    /// stage, length `NUM_STAGES - 1`.
    ///
    /// For explicit methods the coefficients above the main diagonal are
    /// zeros, so `a` is stored as a list of arrays of increasing lengths. The
    /// first stage is always just `f`, thus no coefficients for it are
    /// required.
    fn a() -> &'static [ArrayView1<'static, f64>];

    /// Coefficients for combining RK stages for computing the final
    /// prediction, length `NUM_STAGES`.
    fn b() -> ArrayView1<'static, f64>;

    /// Coefficients for estimating the error of a less accurate method, length
    /// `NUM_STAGES + 1`.
    ///
    /// They are computed as the difference between `b`'s in an extended
    /// tableau.
    fn e() -> ArrayView1<'static, f64>;
}

/// Explicit Runge–Kutta method of order 3(2).
///
/// The Bogacki-Shampine pair of formulas is used (ref 1). The error is
/// controlled assuming 2nd order accuracy, but steps are taken using a 3rd
/// order accurate formula (local extrapolation is done).
///
/// # References
///
/// 1. P. Bogacki, L.F. Shampine, "A 3(2) Pair of Runge-Kutta Formulas",
///    Appl. Math. Lett. Vol. 2, No. 4. pp. 321-325, 1989.
pub struct RK23;

impl RKMethod for RK23 {
    const ORDER: usize = 2;

    const NUM_STAGES: usize = 3;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1. / 2., 3. / 4.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 3 - 1] = [
                aview1(&[1. / 2.]),
                aview1(&[0., 3. / 4.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[2. / 9., 1. / 3., 4. / 9.])
    }

    fn e() -> ArrayView1<'static, f64> {
        aview1(&[5. / 72., -1. / 12., -1. / 9., 1. / 8.])
    }
}

/// Explicit Runge–Kutta method of order 5(4).
///
/// The Dormand-Prince pair of formulas is used (ref 1). The error is
/// controlled assuming 4th order accuracy, but steps are taken using a 5th
/// order accurate formula (local extrapolation is done).
///
/// # References
///
/// 1. J. R. Dormand, P. J. Prince, "A family of embedded Runge-Kutta
///    formulae", Journal of Computational and Applied Mathematics, Vol. 6, No.
///    1, pp. 19-26, 1980.
pub struct RK45;

impl RKMethod for RK45 {
    const ORDER: usize = 4;

    const NUM_STAGES: usize = 6;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1. / 5., 3. / 10., 4. / 5., 8. / 9., 1.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 6 - 1] = [
                aview1(&[1. / 5.]),
                aview1(&[3. / 40., 9. / 40.]),
                aview1(&[44. / 45., -56. / 15., 32. / 9.]),
                aview1(&[19372. / 6561., -25360. / 2187., 64448. / 6561., -212. / 729.]),
                aview1(&[9017. / 3168., -355. / 33., 46732. / 5247., 49. / 176., -5103. / 18656.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[35. / 384., 0., 500. / 1113., 125. / 192., -2187. / 6784., 11. / 84.])
    }

    fn e() -> ArrayView1<'static, f64> {
        aview1(&[
            -71. / 57600.,
            0.,
            71. / 16695.,
            -71. / 1920.,
            17253. / 339200.,
            -22. / 525.,
            1. / 40.,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expandable::OdeEquations;
    use approx::assert_relative_eq;

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

    fn solver<O: RKMethod>(t_bound: f64, rtol: f64) -> Result<RungeKutta<f64, O>> {
        RungeKutta::new(
            ExpandableOde::new(Decay),
            0.,
            array![1.],
            t_bound,
            f64::INFINITY,
            array![rtol],
            array![1e-9],
        )
    }

    #[test]
    fn next_after_special_cases() {
        assert_eq!(next_after(1., 1.), 1.);
        assert!(next_after(f64::NAN, 1.).is_nan());
        assert_eq!(next_after(0., 1.), f64::from_bits(1));
        assert_eq!(next_after(0., -1.), -f64::from_bits(1));
        assert!(next_after(1., 2.) > 1.);
        assert!(next_after(-1., -2.) < -1.);
        assert!(next_after(1., 0.) < 1.);
    }

    #[test]
    fn norm_uses_real_parts() {
        let x = array![3., 4.];
        let scale = array![1., 2.];
        assert_relative_eq!(norm(x.view(), scale.view()), (13f64 / 2.).sqrt());
    }

    #[test]
    fn combine_weights_stages() {
        let base = array![1., 1.];
        let stages = vec![array![1., 2.], array![3., 4.]];
        let out = combine(&base, &stages, aview1(&[0.5, 0.]), 2.);
        assert_eq!(out, array![2., 3.]);
    }

    #[test]
    fn tableaux_have_consistent_lengths() {
        fn check<O: RKMethod>() {
            assert_eq!(O::c().len(), O::NUM_STAGES - 1);
            assert_eq!(O::a().len(), O::NUM_STAGES - 1);
            for (s, a) in O::a().iter().enumerate() {
                assert_eq!(a.len(), s + 1);
            }
            assert_eq!(O::b().len(), O::NUM_STAGES);
            assert_eq!(O::e().len(), O::NUM_STAGES + 1);
            assert_relative_eq!(O::b().sum(), 1., epsilon = 1e-12);
            assert_relative_eq!(O::e().sum(), 0., epsilon = 1e-12);
        }
        check::<RK23>();
        check::<RK45>();
    }

    #[test]
    fn exponential_decay() {
        let mut rk23 = solver::<RK23>(2., 1e-6).unwrap();
        rk23.run_to_bound().unwrap();
        assert_relative_eq!(rk23.state()[0], (-2f64).exp(), max_relative = 1e-4);

        let mut rk45 = solver::<RK45>(2., 1e-6).unwrap();
        assert!(rk45.step_size().is_none());
        rk45.run_to_bound().unwrap();
        assert!(rk45.finished());
        assert!(rk45.step_size().is_some());
        assert_eq!(rk45.len(), 1);
        assert_relative_eq!(rk45.state()[0], (-2f64).exp(), max_relative = 1e-4);
        assert_relative_eq!(rk45.state_deriv()[0], -rk45.state()[0]);
    }

    #[test]
    fn backwards_integration() {
        let mut rk45 = solver::<RK45>(-1., 1e-6).unwrap();
        rk45.run_to_bound().unwrap();
        assert_eq!(rk45.time(), -1.);
        assert_relative_eq!(rk45.state()[0], 1f64.exp(), max_relative = 1e-4);
    }

    #[test]
    fn empty_state_is_rejected() {
        let empty = RungeKutta::<_, RK45>::new(
            ExpandableOde::new(Decay),
            0.,
            Array1::<f64>::zeros(0),
            1.,
            f64::INFINITY,
            Array1::zeros(0),
            Array1::zeros(0),
        );
        assert_eq!(empty.err(), Some(Error::EmptyComplete));
    }

    #[test]
    fn invalid_arguments() {
        assert_eq!(
            solver::<RK45>(f64::INFINITY, 1e-3).err(),
            Some(Error::TimeBoundNotFinite),
        );
        assert_eq!(solver::<RK45>(1., 1e-20).err(), Some(Error::TooSmallRelTol));
        let unequal = RungeKutta::<_, RK45>::new(
            ExpandableOde::new(Decay),
            0.,
            array![1.],
            1.,
            0.,
            array![1e-3],
            array![1e-6],
        );
        assert_eq!(unequal.err(), Some(Error::MaxStepZeroOrNeg));
        let unequal = RungeKutta::<_, RK45>::new(
            ExpandableOde::new(Decay),
            0.,
            array![1.],
            1.,
            1.,
            array![1e-3, 1e-3],
            array![1e-6],
        );
        assert_eq!(unequal.err(), Some(Error::UnequalLengths));
        let mismatched = RungeKutta::<_, RK45>::new(
            ExpandableOde::new(Decay),
            0.,
            array![1., 2.],
            1.,
            1.,
            array![1e-3, 1e-3],
            array![1e-6, 1e-6],
        );
        assert_eq!(
            mismatched.err(),
            Some(Error::DimensionMismatch {
                expected: 1,
                found: 2
            }),
        );
    }
}
