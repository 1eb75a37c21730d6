//! Callbacks injected into the integration loop
//!
//! Provides continuous callbacks located by root finding on the dense output,
//! discrete callbacks checked after every accepted step, periodic callbacks
//! landing on scheduled times, and noise injection for probabilistic
//! integration.

mod base;
mod continuous;
mod discrete;
#[cfg(feature = "rand-support")]
mod noise;
mod periodic;

pub use base::{
    AffectContext, AffectFn, Callback, CallbackPhase, CallbackSet, ConditionFn, EventDirection,
};
pub(crate) use base::{run_affect, AffectOutcome};
pub use continuous::{find_root, terminate_when, ContinuousCallback, Crossing, Root};
pub use discrete::DiscreteCallback;
#[cfg(feature = "rand-support")]
pub use noise::{NoiseScale, ProbIntsNoise};
pub use periodic::{PeriodicCallback, Schedule};
