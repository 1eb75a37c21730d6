//! Algorithm descriptors
//!
//! A descriptor is a cheap `Copy` handle on the static coefficient data of
//! one method. Algorithms are selected by value; [`AlgorithmDescriptor::build`]
//! creates the matching stepper.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::base::Stepper;
use super::bdf::{self, Bdf, BdfFamily};
use super::explicit::ExplicitRk;
use super::rosenbrock::{self, Rosenbrock, RosenbrockTableau};
use super::tableau::{self, ButcherTableau};

/// Stability class of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StiffnessClass {
    Explicit,
    RosenbrockW,
    Implicit,
}

/// Handle on the static description of a stepping method
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlgorithmDescriptor {
    Explicit(&'static ButcherTableau),
    Rosenbrock(&'static RosenbrockTableau),
    Bdf(&'static BdfFamily),
}

pub const EULER: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::EULER);
pub const RK4: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::RK4);
pub const SSPRK22: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::SSPRK22);
pub const SSPRK33: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::SSPRK33);
pub const SSPRK34: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::SSPRK34);
pub const RKBS32: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::RKBS32);
pub const RKF45: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::RKF45);
pub const RKCK54: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::RKCK54);
pub const RKDP54: AlgorithmDescriptor = AlgorithmDescriptor::Explicit(&tableau::RKDP54);
pub const RODAS4: AlgorithmDescriptor = AlgorithmDescriptor::Rosenbrock(&rosenbrock::RODAS4);
pub const BDF1: AlgorithmDescriptor = AlgorithmDescriptor::Bdf(&bdf::BDF1);
pub const BDF2: AlgorithmDescriptor = AlgorithmDescriptor::Bdf(&bdf::BDF2);
pub const BDF3: AlgorithmDescriptor = AlgorithmDescriptor::Bdf(&bdf::BDF3);
pub const BDF4: AlgorithmDescriptor = AlgorithmDescriptor::Bdf(&bdf::BDF4);
pub const BDF5: AlgorithmDescriptor = AlgorithmDescriptor::Bdf(&bdf::BDF5);

/// Every built-in algorithm
pub const ALGORITHMS: [AlgorithmDescriptor; 15] = [
    EULER, RK4, SSPRK22, SSPRK33, SSPRK34, RKBS32, RKF45, RKCK54, RKDP54, RODAS4, BDF1, BDF2,
    BDF3, BDF4, BDF5,
];

impl AlgorithmDescriptor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Explicit(tab) => tab.name,
            Self::Rosenbrock(tab) => tab.name,
            Self::Bdf(family) => family.name,
        }
    }

    /// Order of the propagated solution (maximum order for BDF)
    pub fn order(&self) -> usize {
        match self {
            Self::Explicit(tab) => tab.order,
            Self::Rosenbrock(tab) => tab.order,
            Self::Bdf(family) => family.max_order,
        }
    }

    pub fn stages(&self) -> usize {
        match self {
            Self::Explicit(tab) => tab.stages(),
            Self::Rosenbrock(tab) => tab.stages(),
            Self::Bdf(_) => 1,
        }
    }

    pub fn stiffness_class(&self) -> StiffnessClass {
        match self {
            Self::Explicit(_) => StiffnessClass::Explicit,
            Self::Rosenbrock(_) => StiffnessClass::RosenbrockW,
            Self::Bdf(_) => StiffnessClass::Implicit,
        }
    }

    /// Does the method solve linear systems (and so need a Jacobian)?
    pub fn requires_linear_solver(&self) -> bool {
        !matches!(self, Self::Explicit(_))
    }

    /// Does the method carry an embedded error estimate?
    pub fn is_adaptive(&self) -> bool {
        match self {
            Self::Explicit(tab) => tab.is_embedded(),
            Self::Rosenbrock(_) | Self::Bdf(_) => true,
        }
    }

    pub fn is_multistep(&self) -> bool {
        matches!(self, Self::Bdf(_))
    }

    /// Can the method integrate `M x' = f` with a non-identity `M`?
    pub fn supports_mass_matrix(&self) -> bool {
        self.requires_linear_solver()
    }

    /// Look a built-in algorithm up by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        ALGORITHMS
            .iter()
            .copied()
            .find(|alg| alg.name().eq_ignore_ascii_case(name))
    }

    /// Create a fresh stepper for this method
    pub fn build(&self) -> Box<dyn Stepper> {
        match *self {
            Self::Explicit(tab) => Box::new(ExplicitRk::new(tab)),
            Self::Rosenbrock(tab) => Box::new(Rosenbrock::new(tab)),
            Self::Bdf(family) => Box::new(Bdf::new(family)),
        }
    }
}

impl PartialEq for AlgorithmDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for AlgorithmDescriptor {}

impl fmt::Debug for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<AlgorithmDescriptor> for String {
    fn from(alg: AlgorithmDescriptor) -> Self {
        alg.name().to_string()
    }
}

impl TryFrom<String> for AlgorithmDescriptor {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_name(&name).ok_or_else(|| format!("unknown algorithm '{}'", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_and_resolvable() {
        for alg in ALGORITHMS {
            assert_eq!(AlgorithmDescriptor::from_name(alg.name()), Some(alg));
            assert_eq!(ALGORITHMS.iter().filter(|a| a.name() == alg.name()).count(), 1);
        }
        assert_eq!(AlgorithmDescriptor::from_name("rkdp54"), Some(RKDP54));
        assert_eq!(AlgorithmDescriptor::from_name("RK45"), None);
    }

    #[test]
    fn test_classes() {
        assert_eq!(RKDP54.stiffness_class(), StiffnessClass::Explicit);
        assert_eq!(RODAS4.stiffness_class(), StiffnessClass::RosenbrockW);
        assert_eq!(BDF3.stiffness_class(), StiffnessClass::Implicit);
        assert!(!RK4.requires_linear_solver());
        assert!(RODAS4.requires_linear_solver());
        assert!(!RK4.is_adaptive());
        assert!(RKF45.is_adaptive());
        assert!(BDF2.is_multistep());
        assert_eq!(RKDP54.stages(), 7);
        assert_eq!(BDF4.order(), 4);
    }

    #[test]
    fn test_build_matches_descriptor() {
        for alg in ALGORITHMS {
            let stepper = alg.build();
            assert_eq!(stepper.descriptor(), alg);
            assert_eq!(stepper.is_multistep(), alg.is_multistep());
            assert_eq!(stepper.is_adaptive(), alg.is_adaptive());
        }
    }

    #[test]
    fn test_try_from_string() {
        assert_eq!(AlgorithmDescriptor::try_from("RODAS4".to_string()), Ok(RODAS4));
        assert!(AlgorithmDescriptor::try_from("nope".to_string()).is_err());
        assert_eq!(String::from(SSPRK34), "SSPRK34");
    }
}
