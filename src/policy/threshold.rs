use log::info;

use crate::types::{BurstEvent, ControlProposal, PolicyKind};

/// Burst-driven step controller.
///
/// A burst onset proposes `+step_up` at most once per `cooldown_sec`. After
/// `quiet_sec` without burst activity it proposes `-step_down` and restarts the
/// quiet timer. Any active burst cycle also restarts the quiet timer, so a
/// long burst blocks downward steps for its whole duration.
#[derive(Clone, Debug)]
pub struct ThresholdPolicy {
    step_up_ma: f64,
    step_down_ma: f64,
    cooldown_sec: f64,
    quiet_sec: f64,
    last_up: Option<f64>,
    last_activity: Option<f64>,
}

impl ThresholdPolicy {
    pub fn new(step_up_ma: f64, step_down_ma: f64, cooldown_sec: f64, quiet_sec: f64) -> Self {
        Self {
            step_up_ma,
            step_down_ma,
            cooldown_sec,
            quiet_sec,
            last_up: None,
            last_activity: None,
        }
    }

    pub fn propose(&mut self, event: &BurstEvent, now: f64) -> ControlProposal {
        ControlProposal::Delta {
            kind: PolicyKind::Threshold,
            delta_ma: self.step(event, now),
        }
    }

    fn step(&mut self, event: &BurstEvent, now: f64) -> f64 {
        if event.just_started {
            self.last_activity = Some(now);
            let cooled = self
                .last_up
                .map_or(true, |t| now - t >= self.cooldown_sec);
            if cooled {
                self.last_up = Some(now);
                info!("[POLICY] Burst start -> +{:.3} mA (cooldown ok)", self.step_up_ma);
                return self.step_up_ma;
            }
            info!("[POLICY] Burst start within cooldown -> no change");
            return 0.0;
        }
        if event.active {
            self.last_activity = Some(now);
            return 0.0;
        }
        // the quiet timer starts with the first observation
        let since = *self.last_activity.get_or_insert(now);
        let quiet_for = now - since;
        if quiet_for >= self.quiet_sec {
            self.last_activity = Some(now);
            info!("[POLICY] Quiet for {:.0}s -> -{:.3} mA", quiet_for, self.step_down_ma);
            return -self.step_down_ma;
        }
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> BurstEvent {
        BurstEvent {
            active: true,
            just_started: true,
            ..BurstEvent::default()
        }
    }

    fn active() -> BurstEvent {
        BurstEvent {
            active: true,
            ..BurstEvent::default()
        }
    }

    fn quiet() -> BurstEvent {
        BurstEvent::default()
    }

    fn delta(p: ControlProposal) -> f64 {
        match p {
            ControlProposal::Delta { delta_ma, .. } => delta_ma,
            other => panic!("expected a delta, got {other:?}"),
        }
    }

    fn policy() -> ThresholdPolicy {
        ThresholdPolicy::new(0.10, 0.05, 60.0, 120.0)
    }

    #[test]
    fn first_burst_steps_up() {
        let mut p = policy();
        assert!((delta(p.propose(&started(), 5.0)) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn second_burst_within_cooldown_is_suppressed() {
        let mut p = policy();
        assert!(delta(p.propose(&started(), 10.0)) > 0.0);
        assert_eq!(delta(p.propose(&quiet(), 20.0)), 0.0);
        assert_eq!(delta(p.propose(&started(), 69.0)), 0.0);
        // once the cooldown has passed the next onset steps up again
        assert!(delta(p.propose(&started(), 70.0)) > 0.0);
    }

    #[test]
    fn active_cycles_propose_nothing() {
        let mut p = policy();
        p.propose(&started(), 0.0);
        for t in 1..500 {
            assert_eq!(delta(p.propose(&active(), t as f64)), 0.0);
        }
    }

    #[test]
    fn quiet_period_steps_down_once_then_resets() {
        let mut p = policy();
        assert_eq!(delta(p.propose(&quiet(), 0.0)), 0.0);
        assert_eq!(delta(p.propose(&quiet(), 119.0)), 0.0);
        assert!((delta(p.propose(&quiet(), 120.0)) + 0.05).abs() < 1e-12);
        // timer restarted: no repeated down-step on the next cycle
        assert_eq!(delta(p.propose(&quiet(), 121.0)), 0.0);
        assert!((delta(p.propose(&quiet(), 240.0)) + 0.05).abs() < 1e-12);
    }

    #[test]
    fn sustained_burst_blocks_down_steps() {
        let mut p = policy();
        p.propose(&started(), 0.0);
        for t in 1..=300 {
            p.propose(&active(), t as f64);
        }
        // quiet timer restarted at t=300
        assert_eq!(delta(p.propose(&quiet(), 301.0)), 0.0);
        assert_eq!(delta(p.propose(&quiet(), 419.0)), 0.0);
        assert!(delta(p.propose(&quiet(), 420.0)) < 0.0);
    }
}
