use crate::types::{ControlProposal, PolicyKind};

/// PID-style mapping from biomarker error to a bounded current step.
///
/// The integral term accumulates without decay or clamping.
#[derive(Clone, Debug)]
pub struct PidPolicy {
    kp: f64,
    ki: f64,
    kd: f64,
    max_step_ma: f64,
    integral: f64,
    prev_err: Option<f64>,
}

impl PidPolicy {
    pub fn new(kp: f64, ki: f64, kd: f64, max_step_ma: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            max_step_ma: max_step_ma.abs(),
            integral: 0.0,
            prev_err: None,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn propose(&mut self, biomarker: f64, target: f64) -> ControlProposal {
        let err = target - biomarker;
        self.integral += err;
        let derivative = self.prev_err.map_or(0.0, |prev| err - prev);
        self.prev_err = Some(err);
        let delta = self.kp * err + self.ki * self.integral + self.kd * derivative;
        ControlProposal::Delta {
            kind: PolicyKind::Pid,
            delta_ma: delta.clamp(-self.max_step_ma, self.max_step_ma),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(p: ControlProposal) -> f64 {
        match p {
            ControlProposal::Delta { delta_ma, .. } => delta_ma,
            other => panic!("expected a delta, got {other:?}"),
        }
    }

    #[test]
    fn zero_error_proposes_nothing() {
        let mut pid = PidPolicy::new(0.15, 0.0, 0.0, 0.2);
        for _ in 0..50 {
            assert_eq!(delta(pid.propose(1.0, 1.0)), 0.0);
        }
    }

    #[test]
    fn step_is_bounded_for_any_error() {
        let mut pid = PidPolicy::new(0.15, 0.0, 0.0, 0.2);
        for biomarker in [-1e9, -50.0, -1.0, 0.0, 0.5, 3.0, 1e6, 1e12] {
            let d = delta(pid.propose(biomarker, 1.0));
            assert!(d.abs() <= 0.2 + 1e-12, "biomarker={biomarker} delta={d}");
        }
    }

    #[test]
    fn proportional_term_below_limit() {
        let mut pid = PidPolicy::new(0.15, 0.0, 0.0, 0.2);
        // biomarker above target -> reduce current
        assert!((delta(pid.propose(1.5, 1.0)) + 0.075).abs() < 1e-12);
    }

    #[test]
    fn integral_accumulates_without_bound() {
        let mut pid = PidPolicy::new(0.0, 0.01, 0.0, 0.2);
        for _ in 0..1000 {
            pid.propose(0.0, 1.0);
        }
        assert!((pid.integral() - 1000.0).abs() < 1e-9);
        // output is still clamped even though the integral keeps growing
        assert!((delta(pid.propose(0.0, 1.0)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn derivative_uses_previous_error() {
        let mut pid = PidPolicy::new(0.0, 0.0, 0.1, 1.0);
        // no derivative on the first call
        assert_eq!(delta(pid.propose(0.0, 1.0)), 0.0);
        // error goes from 1.0 to 3.0
        assert!((delta(pid.propose(-2.0, 1.0)) - 0.2).abs() < 1e-12);
    }
}
