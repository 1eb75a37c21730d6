//! Dense output
//!
//! Every accepted step leaves behind a [`Segment`] able to evaluate the
//! solution and its derivative anywhere inside the step. Segments are kept in
//! an append-only [`DenseOutput`] that is contiguous in time and searched by
//! bisection.

use nalgebra::DVector;
use thiserror::Error;

/// Dense output query errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    #[error("Time {t} lies outside the covered span [{start}, {end}]")]
    OutOfRange { t: f64, start: f64, end: f64 },

    #[error("No dense output has been recorded")]
    Empty,
}

/// Step data a stepper hands over for its own interpolant
#[derive(Debug, Clone, PartialEq)]
pub enum InterpolationData {
    /// Cubic Hermite from the endpoint states and derivatives
    Hermite,
    /// Quartic Hermite through an extra midpoint value
    /// `x0 + partial + h * w_end * f1`, where `partial = h Σ w_i k_i` over the
    /// stages and `f1` is the derivative at the new solution
    Midpoint { partial: DVector<f64>, w_end: f64 },
    /// Dormand-Prince continuous extension, `r5 = h Σ d_i k_i`
    Dopri5 { r5: DVector<f64> },
    /// Rosenbrock stiff-aware correction terms built from the stage increments
    StiffAware { k1: DVector<f64>, k2: DVector<f64> },
}

/// Local polynomial of one segment
#[derive(Debug, Clone, PartialEq)]
pub enum Interpolant {
    Hermite {
        f0: DVector<f64>,
        f1: DVector<f64>,
    },
    /// Cubic Hermite plus `θ²(1-θ)² bump`, the bump fixing the midpoint value
    QuarticHermite {
        f0: DVector<f64>,
        f1: DVector<f64>,
        bump: DVector<f64>,
    },
    Dopri5 {
        r3: DVector<f64>,
        r4: DVector<f64>,
        r5: DVector<f64>,
    },
    StiffAware {
        k1: DVector<f64>,
        k2: DVector<f64>,
    },
}

/// Interpolant over one accepted step
///
/// `h` and `x_full` always describe the step as it was taken. After an event
/// truncates the step, `t_end` and `x_end` move to the event while the
/// polynomial stays untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    t_start: f64,
    h: f64,
    t_end: f64,
    x_start: DVector<f64>,
    x_full: DVector<f64>,
    x_end: DVector<f64>,
    kind: Interpolant,
}

impl Segment {
    /// Build the segment of a step from `(t0, x0)` to `(t1, x1)`
    ///
    /// `f0` and `f1` are the derivatives at both ends.
    pub fn build(
        t0: f64,
        x0: &DVector<f64>,
        f0: &DVector<f64>,
        t1: f64,
        x1: &DVector<f64>,
        f1: &DVector<f64>,
        data: InterpolationData,
    ) -> Self {
        let h = t1 - t0;
        let kind = match data {
            InterpolationData::Hermite => Interpolant::Hermite {
                f0: f0.clone(),
                f1: f1.clone(),
            },
            InterpolationData::Midpoint { partial, w_end } => {
                let x_mid = x0 + partial + (h * w_end) * f1;
                let cubic_mid = 0.5 * (x0 + x1) + (0.125 * h) * (f0 - f1);
                Interpolant::QuarticHermite {
                    f0: f0.clone(),
                    f1: f1.clone(),
                    bump: 16.0 * (x_mid - cubic_mid),
                }
            }
            InterpolationData::Dopri5 { r5 } => {
                let diff = x1 - x0;
                let r3 = h * f0 - &diff;
                let r4 = &diff - h * f1 - &r3;
                Interpolant::Dopri5 { r3, r4, r5 }
            }
            InterpolationData::StiffAware { k1, k2 } => Interpolant::StiffAware { k1, k2 },
        };

        Self {
            t_start: t0,
            h,
            t_end: t1,
            x_start: x0.clone(),
            x_full: x1.clone(),
            x_end: x1.clone(),
            kind,
        }
    }

    pub fn t_start(&self) -> f64 {
        self.t_start
    }

    pub fn t_end(&self) -> f64 {
        self.t_end
    }

    pub fn x_start(&self) -> &DVector<f64> {
        &self.x_start
    }

    pub fn x_end(&self) -> &DVector<f64> {
        &self.x_end
    }

    pub fn kind(&self) -> &Interpolant {
        &self.kind
    }

    /// Signed length of the covered interval
    pub fn length(&self) -> f64 {
        self.t_end - self.t_start
    }

    /// Is `t` inside the closed interval covered by this segment?
    pub fn contains(&self, t: f64) -> bool {
        let (lo, hi) = if self.h >= 0.0 {
            (self.t_start, self.t_end)
        } else {
            (self.t_end, self.t_start)
        };
        t >= lo && t <= hi
    }

    /// Solution at `t`; exact at both endpoints
    pub fn evaluate(&self, t: f64) -> DVector<f64> {
        if t == self.t_start {
            return self.x_start.clone();
        }
        if t == self.t_end {
            return self.x_end.clone();
        }
        self.polynomial(t)
    }

    fn polynomial(&self, t: f64) -> DVector<f64> {
        let theta = (t - self.t_start) / self.h;
        let theta1 = 1.0 - theta;
        let x0 = &self.x_start;
        let x1 = &self.x_full;

        match &self.kind {
            Interpolant::Hermite { f0, f1 } => self.cubic(theta, f0, f1),
            Interpolant::QuarticHermite { f0, f1, bump } => {
                let w = theta * theta1;
                self.cubic(theta, f0, f1) + (w * w) * bump
            }
            Interpolant::Dopri5 { r3, r4, r5 } => {
                let diff = x1 - x0;
                let inner = r3 + theta * (r4 + theta1 * r5);
                x0 + theta * (diff + theta1 * inner)
            }
            Interpolant::StiffAware { k1, k2 } => {
                theta1 * x0 + theta * (x1 + theta1 * (k1 + theta * k2))
            }
        }
    }

    fn cubic(&self, theta: f64, f0: &DVector<f64>, f1: &DVector<f64>) -> DVector<f64> {
        let x0 = &self.x_start;
        let diff = &self.x_full - x0;
        let g = (1.0 - 2.0 * theta) * &diff + (theta - 1.0) * self.h * f0 + theta * self.h * f1;
        x0 + theta * &diff + (theta * (theta - 1.0)) * g
    }

    /// `d/dθ` of the cubic Hermite part
    fn cubic_slope(&self, theta: f64, f0: &DVector<f64>, f1: &DVector<f64>) -> DVector<f64> {
        let diff = &self.x_full - &self.x_start;
        let g = (1.0 - 2.0 * theta) * &diff + (theta - 1.0) * self.h * f0 + theta * self.h * f1;
        let dg = -2.0 * &diff + self.h * f0 + self.h * f1;
        &diff + (2.0 * theta - 1.0) * g + (theta * (theta - 1.0)) * dg
    }

    /// Time derivative of the interpolant at `t`
    pub fn derivative(&self, t: f64) -> DVector<f64> {
        let theta = (t - self.t_start) / self.h;
        let theta1 = 1.0 - theta;
        let x0 = &self.x_start;
        let x1 = &self.x_full;
        let diff = x1 - x0;

        let d_theta = match &self.kind {
            Interpolant::Hermite { f0, f1 } => self.cubic_slope(theta, f0, f1),
            Interpolant::QuarticHermite { f0, f1, bump } => {
                let w = 2.0 * theta * theta1 * (1.0 - 2.0 * theta);
                self.cubic_slope(theta, f0, f1) + w * bump
            }
            Interpolant::Dopri5 { r3, r4, r5 } => {
                let p = r3 + theta * (r4 + theta1 * r5);
                let dp = r4 + (1.0 - 2.0 * theta) * r5;
                let q = &diff + theta1 * &p;
                let dq = -p + theta1 * dp;
                q + theta * dq
            }
            Interpolant::StiffAware { k1, k2 } => {
                let a = k1 + theta * k2;
                diff + (1.0 - 2.0 * theta) * a + (theta * theta1) * k2
            }
        };

        d_theta / self.h
    }

    /// Shorten the segment so it ends at `t`
    pub fn truncate(&mut self, t: f64) {
        self.x_end = self.evaluate(t);
        self.t_end = t;
    }
}

/// Ordered, contiguous sequence of segments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseOutput {
    segments: Vec<Segment>,
}

impl DenseOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Append the segment of the next accepted step
    ///
    /// Zero-length segments carry no information and are dropped.
    pub fn push(&mut self, segment: Segment) {
        if segment.length() == 0.0 {
            return;
        }
        if let Some(last) = self.segments.last() {
            debug_assert_eq!(last.t_end, segment.t_start, "segments must be contiguous");
        }
        self.segments.push(segment);
    }

    /// Cut the most recent segment back to end at `t`
    ///
    /// A segment cut back to its own start is removed.
    pub fn truncate_last(&mut self, t: f64) {
        if let Some(last) = self.segments.last_mut() {
            last.truncate(t);
            if last.length() == 0.0 {
                self.segments.pop();
            }
        }
    }

    /// Covered span as `(start, end)` in integration order
    pub fn span(&self) -> Option<(f64, f64)> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        Some((first.t_start, last.t_end))
    }

    fn direction(&self) -> f64 {
        match self.segments.first() {
            Some(seg) if seg.h < 0.0 => -1.0,
            _ => 1.0,
        }
    }

    /// Segment owning `t`; boundaries belong to the later segment
    pub fn locate(&self, t: f64) -> Result<&Segment, InterpolationError> {
        let (start, end) = self.span().ok_or(InterpolationError::Empty)?;
        let dir = self.direction();
        if !t.is_finite() || dir * (t - start) < 0.0 || dir * (t - end) > 0.0 {
            return Err(InterpolationError::OutOfRange { t, start, end });
        }

        let idx = self.segments.partition_point(|seg| dir * seg.t_start <= dir * t);
        // `t >= start` guarantees at least one segment starts at or before it
        Ok(&self.segments[idx.max(1) - 1])
    }

    /// Solution at `t`
    pub fn evaluate(&self, t: f64) -> Result<DVector<f64>, InterpolationError> {
        Ok(self.locate(t)?.evaluate(t))
    }

    /// Derivative of the solution at `t`
    pub fn derivative(&self, t: f64) -> Result<DVector<f64>, InterpolationError> {
        Ok(self.locate(t)?.derivative(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exp_segment(t0: f64, t1: f64) -> Segment {
        let x0 = DVector::from_element(1, t0.exp());
        let x1 = DVector::from_element(1, t1.exp());
        Segment::build(t0, &x0, &x0, t1, &x1, &x1, InterpolationData::Hermite)
    }

    #[test]
    fn test_hermite_endpoints_and_midpoint() {
        let seg = exp_segment(0.0, 0.1);
        assert_eq!(seg.evaluate(0.0)[0], 1.0);
        assert_eq!(seg.evaluate(0.1)[0], 0.1_f64.exp());
        assert_relative_eq!(seg.evaluate(0.05)[0], 0.05_f64.exp(), epsilon = 1e-6);
        assert_relative_eq!(seg.derivative(0.0)[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(seg.derivative(0.1)[0], 0.1_f64.exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_quartic_hermite_reproduces_quartic() {
        // x = t^4 on [0, 1]: cubic Hermite misses it, the midpoint value fixes it
        let x0 = DVector::from_element(1, 0.0);
        let f0 = DVector::from_element(1, 0.0);
        let x1 = DVector::from_element(1, 1.0);
        let f1 = DVector::from_element(1, 4.0);
        let data = InterpolationData::Midpoint {
            partial: DVector::from_element(1, 0.0625 - 0.25),
            w_end: 1.0 / 16.0,
        };
        let seg = Segment::build(0.0, &x0, &f0, 1.0, &x1, &f1, data);

        for t in [0.1, 0.3, 0.5, 0.85] {
            assert_relative_eq!(seg.evaluate(t)[0], t.powi(4), epsilon = 1e-14);
            assert_relative_eq!(seg.derivative(t)[0], 4.0 * t.powi(3), epsilon = 1e-14);
        }
        assert_relative_eq!(seg.derivative(1.0)[0], 4.0, epsilon = 1e-14);
    }

    #[test]
    fn test_stiff_aware_reduces_to_linear() {
        let x0 = DVector::from_element(1, 1.0);
        let x1 = DVector::from_element(1, 3.0);
        let zero = DVector::zeros(1);
        let seg = Segment::build(
            0.0,
            &x0,
            &zero,
            2.0,
            &x1,
            &zero,
            InterpolationData::StiffAware {
                k1: zero.clone(),
                k2: zero.clone(),
            },
        );
        assert_relative_eq!(seg.evaluate(1.0)[0], 2.0);
        assert_relative_eq!(seg.derivative(0.5)[0], 1.0);
    }

    #[test]
    fn test_truncate_keeps_polynomial() {
        let mut seg = exp_segment(0.0, 0.2);
        let mid = seg.evaluate(0.1);
        seg.truncate(0.1);
        assert_eq!(seg.t_end(), 0.1);
        assert_eq!(seg.x_end(), &mid);
        assert_relative_eq!(seg.evaluate(0.05)[0], exp_segment(0.0, 0.2).evaluate(0.05)[0]);
    }

    #[test]
    fn test_dense_output_lookup() {
        let mut dense = DenseOutput::new();
        dense.push(exp_segment(0.0, 0.1));
        dense.push(exp_segment(0.1, 0.25));
        dense.push(exp_segment(0.25, 0.25));

        assert_eq!(dense.len(), 2);
        assert_eq!(dense.span(), Some((0.0, 0.25)));
        assert_eq!(dense.locate(0.1).unwrap().t_start(), 0.1);
        assert_eq!(dense.locate(0.25).unwrap().t_start(), 0.1);
        assert_eq!(dense.evaluate(0.25).unwrap()[0], 0.25_f64.exp());
        assert!(matches!(
            dense.evaluate(0.3),
            Err(InterpolationError::OutOfRange { .. })
        ));
        assert_eq!(DenseOutput::new().evaluate(0.0), Err(InterpolationError::Empty));
    }

    #[test]
    fn test_dense_output_reverse() {
        let mut dense = DenseOutput::new();
        dense.push(exp_segment(1.0, 0.5));
        dense.push(exp_segment(0.5, 0.0));

        assert_eq!(dense.locate(0.5).unwrap().t_start(), 0.5);
        assert_eq!(dense.locate(0.7).unwrap().t_start(), 1.0);
        assert_relative_eq!(dense.evaluate(0.25).unwrap()[0], 0.25_f64.exp(), epsilon = 5e-4);
        assert!(dense.evaluate(-0.1).is_err());
        assert!(dense.evaluate(1.1).is_err());
    }
}
