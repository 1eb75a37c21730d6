//! Butcher tableaux of the explicit Runge-Kutta family
//!
//! Every explicit method is pure data: stage couplings `a`, weights `b`,
//! nodes `c` and, for embedded pairs, the error weights `b - b*`. One generic
//! stepper ([`super::explicit::ExplicitRk`]) drives all of them.

/// Continuous extension used for dense output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DenseCoefficients {
    /// Cubic Hermite through both endpoint derivatives
    Hermite,
    /// Quartic Hermite through a 4th order midpoint value. One weight per
    /// stage plus a final weight on the derivative at the new solution.
    Midpoint(&'static [f64]),
    /// Dormand-Prince 4th order extension, one weight per stage
    Dopri5(&'static [f64]),
}

/// Explicit Runge-Kutta tableau
#[derive(Debug, PartialEq)]
pub struct ButcherTableau {
    pub name: &'static str,
    /// Strictly lower triangular; row `i` holds the `i` couplings of stage `i`
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
    /// Error weights `b - b*`
    pub b_err: Option<&'static [f64]>,
    pub c: &'static [f64],
    /// Order of the propagated solution
    pub order: usize,
    /// Order of the embedded solution
    pub embedded_order: Option<usize>,
    /// Last stage is evaluated at the new solution (first same as last)
    pub fsal: bool,
    pub dense: DenseCoefficients,
    /// Strong-stability-preserving coefficient, if the method is SSP
    pub ssp_coefficient: Option<f64>,
    /// Last two stages share a node and allow a `|h λ|` estimate
    pub stiffness_detection: bool,
}

impl ButcherTableau {
    pub fn stages(&self) -> usize {
        self.c.len()
    }

    /// Order handed to the step-size controller
    pub fn error_order(&self) -> usize {
        match self.embedded_order {
            Some(p_hat) => self.order.min(p_hat),
            None => self.order,
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.b_err.is_some()
    }
}

/// Forward Euler
pub const EULER: ButcherTableau = ButcherTableau {
    name: "Euler",
    a: &[&[]],
    b: &[1.0],
    b_err: None,
    c: &[0.0],
    order: 1,
    embedded_order: None,
    fsal: false,
    dense: DenseCoefficients::Hermite,
    ssp_coefficient: Some(1.0),
    stiffness_detection: false,
};

/// Classical 4th order Runge-Kutta
pub const RK4: ButcherTableau = ButcherTableau {
    name: "RK4",
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    b_err: None,
    c: &[0.0, 0.5, 0.5, 1.0],
    order: 4,
    embedded_order: None,
    fsal: false,
    dense: DenseCoefficients::Hermite,
    ssp_coefficient: None,
    stiffness_detection: false,
};

/// Two-stage SSP Runge-Kutta (Heun), CFL coefficient 1
pub const SSPRK22: ButcherTableau = ButcherTableau {
    name: "SSPRK22",
    a: &[&[], &[1.0]],
    b: &[0.5, 0.5],
    b_err: None,
    c: &[0.0, 1.0],
    order: 2,
    embedded_order: None,
    fsal: false,
    dense: DenseCoefficients::Hermite,
    ssp_coefficient: Some(1.0),
    stiffness_detection: false,
};

/// Three-stage SSP Runge-Kutta (Shu-Osher), CFL coefficient 1
pub const SSPRK33: ButcherTableau = ButcherTableau {
    name: "SSPRK33",
    a: &[&[], &[1.0], &[0.25, 0.25]],
    b: &[1.0 / 6.0, 1.0 / 6.0, 2.0 / 3.0],
    b_err: None,
    c: &[0.0, 1.0, 0.5],
    order: 3,
    embedded_order: None,
    fsal: false,
    dense: DenseCoefficients::Hermite,
    ssp_coefficient: Some(1.0),
    stiffness_detection: false,
};

/// Four-stage third order SSP Runge-Kutta, CFL coefficient 2
pub const SSPRK34: ButcherTableau = ButcherTableau {
    name: "SSPRK34",
    a: &[&[], &[0.5], &[0.5, 0.5], &[1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0]],
    b: &[1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, 0.5],
    b_err: None,
    c: &[0.0, 0.5, 1.0, 0.5],
    order: 3,
    embedded_order: None,
    fsal: false,
    dense: DenseCoefficients::Hermite,
    ssp_coefficient: Some(2.0),
    stiffness_detection: false,
};

/// Bogacki-Shampine 3(2), FSAL
#[rustfmt::skip]
pub const RKBS32: ButcherTableau = ButcherTableau {
    name: "RKBS32",
    a: &[
        &[],
        &[1.0/2.0],
        &[0.0, 3.0/4.0],
        &[2.0/9.0, 1.0/3.0, 4.0/9.0],
    ],
    b: &[2.0/9.0, 1.0/3.0, 4.0/9.0, 0.0],
    b_err: Some(&[-5.0/72.0, 1.0/12.0, 1.0/9.0, -1.0/8.0]),
    c: &[0.0, 1.0/2.0, 3.0/4.0, 1.0],
    order: 3,
    embedded_order: Some(2),
    fsal: true,
    dense: DenseCoefficients::Hermite,
    ssp_coefficient: None,
    stiffness_detection: false,
};

/// Runge-Kutta-Fehlberg 4(5), propagates the 4th order solution
#[rustfmt::skip]
pub const RKF45: ButcherTableau = ButcherTableau {
    name: "RKF45",
    a: &[
        &[],
        &[1.0/4.0],
        &[3.0/32.0, 9.0/32.0],
        &[1932.0/2197.0, -7200.0/2197.0, 7296.0/2197.0],
        &[439.0/216.0, -8.0, 3680.0/513.0, -845.0/4104.0],
        &[-8.0/27.0, 2.0, -3544.0/2565.0, 1859.0/4104.0, -11.0/40.0],
    ],
    b: &[25.0/216.0, 0.0, 1408.0/2565.0, 2197.0/4104.0, -1.0/5.0, 0.0],
    b_err: Some(&[-1.0/360.0, 0.0, 128.0/4275.0, 2197.0/75240.0, -1.0/50.0, -2.0/55.0]),
    c: &[0.0, 1.0/4.0, 3.0/8.0, 12.0/13.0, 1.0, 1.0/2.0],
    order: 4,
    embedded_order: Some(5),
    fsal: false,
    dense: DenseCoefficients::Midpoint(&[
        119.0/864.0, 0.0, 1016.0/2565.0, -2197.0/16416.0, 11.0/160.0, 0.0, 1.0/32.0,
    ]),
    ssp_coefficient: None,
    stiffness_detection: false,
};

/// Cash-Karp 5(4)
#[rustfmt::skip]
pub const RKCK54: ButcherTableau = ButcherTableau {
    name: "RKCK54",
    a: &[
        &[],
        &[1.0/5.0],
        &[3.0/40.0, 9.0/40.0],
        &[3.0/10.0, -9.0/10.0, 6.0/5.0],
        &[-11.0/54.0, 5.0/2.0, -70.0/27.0, 35.0/27.0],
        &[1631.0/55296.0, 175.0/512.0, 575.0/13824.0, 44275.0/110592.0, 253.0/4096.0],
    ],
    b: &[37.0/378.0, 0.0, 250.0/621.0, 125.0/594.0, 0.0, 512.0/1771.0],
    b_err: Some(&[
        37.0/378.0 - 2825.0/27648.0,
        0.0,
        250.0/621.0 - 18575.0/48384.0,
        125.0/594.0 - 13525.0/55296.0,
        -277.0/14336.0,
        512.0/1771.0 - 1.0/4.0,
    ]),
    c: &[0.0, 1.0/5.0, 3.0/10.0, 3.0/5.0, 1.0, 7.0/8.0],
    order: 5,
    embedded_order: Some(4),
    fsal: false,
    dense: DenseCoefficients::Midpoint(&[
        89.0/864.0, 0.0, 575.0/1512.0, 25.0/1728.0, -13.0/448.0, 0.0, 1.0/32.0,
    ]),
    ssp_coefficient: None,
    stiffness_detection: false,
};

/// Dormand-Prince 5(4), FSAL with a free 4th order continuous extension
#[rustfmt::skip]
pub const RKDP54: ButcherTableau = ButcherTableau {
    name: "RKDP54",
    a: &[
        &[],
        &[1.0/5.0],
        &[3.0/40.0, 9.0/40.0],
        &[44.0/45.0, -56.0/15.0, 32.0/9.0],
        &[19372.0/6561.0, -25360.0/2187.0, 64448.0/6561.0, -212.0/729.0],
        &[9017.0/3168.0, -355.0/33.0, 46732.0/5247.0, 49.0/176.0, -5103.0/18656.0],
        &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0],
    ],
    b: &[35.0/384.0, 0.0, 500.0/1113.0, 125.0/192.0, -2187.0/6784.0, 11.0/84.0, 0.0],
    b_err: Some(&[
        71.0/57600.0, 0.0, -71.0/16695.0, 71.0/1920.0, -17253.0/339200.0, 22.0/525.0, -1.0/40.0,
    ]),
    c: &[0.0, 1.0/5.0, 3.0/10.0, 4.0/5.0, 8.0/9.0, 1.0, 1.0],
    order: 5,
    embedded_order: Some(4),
    fsal: true,
    dense: DenseCoefficients::Dopri5(&[
        -12715105075.0/11282082432.0,
        0.0,
        87487479700.0/32700410799.0,
        -10690763975.0/1880347072.0,
        701980252875.0/199316789632.0,
        -1453857185.0/822651844.0,
        69997945.0/29380423.0,
    ]),
    ssp_coefficient: None,
    stiffness_detection: true,
};
