//! Periodic callbacks
//!
//! Scheduled times are registered as step stops so the integrator lands on
//! them exactly. Times at or before the initial time never fire.

use super::base::{AffectContext, AffectFn};

/// When a periodic callback fires
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// `start + k * period` for `k = 0, 1, ...` in integration direction,
    /// optionally bounded by `end`
    Every {
        start: f64,
        period: f64,
        end: Option<f64>,
    },
    /// Explicit list of times
    At(Vec<f64>),
}

impl Schedule {
    /// First scheduled time strictly ahead of `t` in `direction`
    pub fn next_after(&self, t: f64, direction: f64) -> Option<f64> {
        let candidate = match self {
            Self::Every { start, period, .. } => {
                let period = period.abs();
                if period == 0.0 || !period.is_finite() {
                    return None;
                }
                let elapsed = direction * (t - start);
                let mut k = if elapsed < 0.0 {
                    0.0
                } else {
                    (elapsed / period).floor()
                };
                let mut next = start + direction * k * period;
                while direction * (next - t) <= 0.0 {
                    k += 1.0;
                    next = start + direction * k * period;
                }
                next
            }
            Self::At(times) => times
                .iter()
                .copied()
                .filter(|&s| direction * (s - t) > 0.0)
                .min_by(|a, b| (direction * a).total_cmp(&(direction * b)))?,
        };

        match self {
            Self::Every { end: Some(end), .. } if direction * (candidate - end) > 0.0 => None,
            _ => Some(candidate),
        }
    }
}

/// Callback firing at scheduled times
pub struct PeriodicCallback {
    schedule: Schedule,
    affect: Box<AffectFn>,
    pub(crate) save_positions: (bool, bool),
    pending: Option<f64>,
}

impl PeriodicCallback {
    pub fn new<A>(schedule: Schedule, affect: A) -> Self
    where
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        Self {
            schedule,
            affect: Box::new(affect),
            save_positions: (true, true),
            pending: None,
        }
    }

    /// Fire every `period` starting at `start`
    pub fn every<A>(start: f64, period: f64, affect: A) -> Self
    where
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        Self::new(
            Schedule::Every {
                start,
                period,
                end: None,
            },
            affect,
        )
    }

    /// Fire at each of `times`
    pub fn at<A>(times: Vec<f64>, affect: A) -> Self
    where
        A: FnMut(&mut AffectContext<'_>) + Send + 'static,
    {
        Self::new(Schedule::At(times), affect)
    }

    pub fn with_save_positions(mut self, before: bool, after: bool) -> Self {
        self.save_positions = (before, after);
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Next time this callback will fire
    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    /// Point the callback at the first time after `t`
    pub(crate) fn arm(&mut self, t: f64, direction: f64) {
        self.pending = self.schedule.next_after(t, direction);
    }

    /// Is a scheduled time reached at `t`?
    pub(crate) fn is_due(&self, t: f64, direction: f64) -> bool {
        matches!(self.pending, Some(s) if direction * (s - t) <= 0.0)
    }

    pub(crate) fn affect(&mut self) -> &mut AffectFn {
        self.affect.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_every_skips_initial_time() {
        let s = Schedule::Every {
            start: 0.0,
            period: 0.1,
            end: None,
        };
        assert_relative_eq!(s.next_after(0.0, 1.0).unwrap(), 0.1);
        assert_relative_eq!(s.next_after(0.25, 1.0).unwrap(), 0.3, epsilon = 1e-15);
        assert_relative_eq!(s.next_after(-1.0, 1.0).unwrap(), 0.0);
    }

    #[test]
    fn test_every_lands_strictly_ahead() {
        let s = Schedule::Every {
            start: 0.0,
            period: 0.1,
            end: Some(0.35),
        };
        let mut t = 0.0;
        let mut fired = Vec::new();
        while let Some(next) = s.next_after(t, 1.0) {
            assert!(next > t);
            fired.push(next);
            t = next;
        }
        assert_eq!(fired.len(), 3);
    }

    #[test]
    fn test_reverse_and_list() {
        let every = Schedule::Every {
            start: 1.0,
            period: 0.25,
            end: None,
        };
        assert_relative_eq!(every.next_after(1.0, -1.0).unwrap(), 0.75);

        let list = Schedule::At(vec![0.5, 0.2, 0.9]);
        assert_eq!(list.next_after(0.2, 1.0), Some(0.5));
        assert_eq!(list.next_after(0.6, -1.0), Some(0.5));
        assert_eq!(list.next_after(0.9, 1.0), None);
    }

    #[test]
    fn test_arm_and_due() {
        let mut cb = PeriodicCallback::at(vec![0.5], |_: &mut AffectContext<'_>| {});
        cb.arm(0.0, 1.0);
        assert_eq!(cb.pending(), Some(0.5));
        assert!(!cb.is_due(0.4, 1.0));
        assert!(cb.is_due(0.5, 1.0));
        cb.arm(0.5, 1.0);
        assert_eq!(cb.pending(), None);
    }
}
