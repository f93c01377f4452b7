//! Safety arbiter: the only component allowed to authorize a change of
//! stimulation current.
//!
//! Every proposal passes, in order, the session limit, the change-interval
//! gate, the bounds/ramp-rate clamp and (optionally) an operator
//! confirmation before a [`StimulationCommand`] is issued.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::SafetyConfig;
use crate::stop::StopSignal;
use crate::types::{ControlProposal, StimulationCommand};

/// Shortest ramp the arbiter will ever hand out, in seconds.
pub const MIN_RAMP_SECONDS: f64 = 2.0;

const RAMP_RATE_FLOOR: f64 = 1e-6;

/// Why a proposal did not turn into a command. None of these are failures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rejection {
    SessionLimitExceeded,
    ChangeIntervalActive { remaining_sec: f64 },
    ConfirmationDeclined,
    ConfirmationTimedOut,
    /// The stop signal fired while waiting for the operator.
    Cancelled,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::SessionLimitExceeded => f.write_str("session limit exceeded"),
            Rejection::ChangeIntervalActive { remaining_sec } => {
                write!(f, "next change allowed in {remaining_sec:.1}s")
            }
            Rejection::ConfirmationDeclined => f.write_str("change declined by operator"),
            Rejection::ConfirmationTimedOut => f.write_str("confirmation timed out"),
            Rejection::Cancelled => f.write_str("confirmation cancelled"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Approved,
    Declined,
    TimedOut,
    Cancelled,
}

/// Bounded-wait operator acknowledgment.
pub trait Confirmer {
    fn confirm(&mut self, target_ma: f64, current_ma: f64, timeout: Duration)
        -> ConfirmationOutcome;
}

/// Asks on the console and waits for a `y`/`yes` line on stdin.
///
/// Stdin is read on a background thread started at the first request, so a
/// pending read never outlives the wait: unanswered lines are discarded
/// before the next prompt.
pub struct ConsoleConfirmer {
    stop: StopSignal,
    lines: Option<Receiver<String>>,
}

impl ConsoleConfirmer {
    const POLL: Duration = Duration::from_millis(100);

    pub fn new(stop: StopSignal) -> Self {
        Self { stop, lines: None }
    }

    fn lines(&mut self) -> &Receiver<String> {
        self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            rx
        })
    }
}

impl Confirmer for ConsoleConfirmer {
    fn confirm(
        &mut self,
        target_ma: f64,
        current_ma: f64,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        let stop = self.stop.clone();
        let lines = self.lines();
        while lines.try_recv().is_ok() {}
        info!(
            "[CONFIRM] Apply new target {target_ma:.3} mA (now {current_ma:.3} mA)? [y/N] ({}s)",
            timeout.as_secs_f64()
        );
        let deadline = Instant::now() + timeout;
        loop {
            if stop.is_triggered() {
                return ConfirmationOutcome::Cancelled;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return ConfirmationOutcome::TimedOut;
            }
            match lines.recv_timeout(left.min(Self::POLL)) {
                Ok(answer) => {
                    let answer = answer.trim().to_ascii_lowercase();
                    return if answer == "y" || answer == "yes" {
                        ConfirmationOutcome::Approved
                    } else {
                        ConfirmationOutcome::Declined
                    };
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("[CONFIRM] stdin closed, treating as declined");
                    return ConfirmationOutcome::Declined;
                }
            }
        }
    }
}

/// Replays a fixed list of answers, then `fallback` forever.
pub struct ScriptedConfirmer {
    answers: VecDeque<ConfirmationOutcome>,
    fallback: ConfirmationOutcome,
    asked: usize,
}

impl ScriptedConfirmer {
    pub fn new<I>(answers: I, fallback: ConfirmationOutcome) -> Self
    where
        I: IntoIterator<Item = ConfirmationOutcome>,
    {
        Self {
            answers: answers.into_iter().collect(),
            fallback,
            asked: 0,
        }
    }

    pub fn always(outcome: ConfirmationOutcome) -> Self {
        Self::new([], outcome)
    }

    /// Number of confirmation requests seen so far.
    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&mut self, _: f64, _: f64, _: Duration) -> ConfirmationOutcome {
        self.asked += 1;
        self.answers.pop_front().unwrap_or(self.fallback)
    }
}

pub struct SafetyArbiter {
    cfg: SafetyConfig,
    session_start: f64,
    last_change: Option<f64>,
    confirmer: Box<dyn Confirmer>,
}

impl SafetyArbiter {
    pub fn new(cfg: SafetyConfig, session_start: f64, confirmer: Box<dyn Confirmer>) -> Self {
        Self {
            cfg,
            session_start,
            last_change: None,
            confirmer,
        }
    }

    pub fn last_change(&self) -> Option<f64> {
        self.last_change
    }

    fn session_elapsed_exceeded(&self, now: f64) -> bool {
        now - self.session_start > self.cfg.max_session_minutes * 60.0
    }

    /// False once more than `max_session_minutes` have elapsed.
    pub fn within_session_limits(&self, now: f64) -> bool {
        if self.session_elapsed_exceeded(now) {
            warn!("[SAFETY] Max session time exceeded. Stopping.");
            return false;
        }
        true
    }

    /// Seconds left before the session limit, never negative.
    pub fn session_remaining(&self, now: f64) -> f64 {
        (self.cfg.max_session_minutes * 60.0 - (now - self.session_start)).max(0.0)
    }

    fn interval_remaining(&self, now: f64) -> f64 {
        self.last_change
            .map_or(0.0, |t| self.cfg.min_seconds_between_changes - (now - t))
    }

    pub fn can_change_now(&self, now: f64) -> bool {
        self.interval_remaining(now) <= 0.0
    }

    /// Largest change allowed in one eligible interval.
    pub fn max_step_ma(&self) -> f64 {
        self.cfg.ramp_rate_ma_per_min * (self.cfg.min_seconds_between_changes / 60.0)
    }

    /// Clamps `proposed_ma` to the absolute bounds, then limits the step
    /// away from `current_ma` to [`max_step_ma`](Self::max_step_ma).
    pub fn clamp_target(&self, proposed_ma: f64, current_ma: f64) -> f64 {
        let (lo, hi) = (self.cfg.min_ma, self.cfg.max_ma);
        if proposed_ma.is_nan() {
            return current_ma.clamp(lo, hi);
        }
        let bounded = proposed_ma.clamp(lo, hi);
        let step = self.max_step_ma();
        let delta = (bounded - current_ma).clamp(-step, step);
        (current_ma + delta).clamp(lo, hi)
    }

    pub fn ramp_seconds(&self, delta_ma: f64) -> f64 {
        let rate = self.cfg.ramp_rate_ma_per_min.max(RAMP_RATE_FLOOR);
        (60.0 * delta_ma.abs() / rate).max(MIN_RAMP_SECONDS)
    }

    /// Largest change a ramp of `seconds` covers at the configured rate.
    pub fn ramp_reach_ma(&self, seconds: f64) -> f64 {
        self.cfg.ramp_rate_ma_per_min.max(RAMP_RATE_FLOOR) * seconds.max(0.0) / 60.0
    }

    /// Runs `proposal` through every gate and commits it on success.
    ///
    /// The change timestamp is only recorded for authorized commands.
    pub fn authorize(
        &mut self,
        proposal: &ControlProposal,
        current_ma: f64,
        now: f64,
    ) -> Result<StimulationCommand, Rejection> {
        if self.session_elapsed_exceeded(now) {
            return Err(Rejection::SessionLimitExceeded);
        }
        let remaining = self.interval_remaining(now);
        if remaining > 0.0 {
            debug!("[SAFETY] change interval active, {remaining:.1}s left");
            return Err(Rejection::ChangeIntervalActive {
                remaining_sec: remaining,
            });
        }

        let proposed = proposal.resolve(current_ma);
        let target_ma = self.clamp_target(proposed, current_ma);
        info!(
            "[CTRL] {} proposed={proposed:.3} mA -> clamped target={target_ma:.3} mA (now={current_ma:.3})",
            proposal.kind()
        );

        if self.cfg.require_human_confirm {
            let timeout = Duration::from_secs_f64(self.cfg.confirm_timeout_sec.max(0.0));
            let rejection = match self.confirmer.confirm(target_ma, current_ma, timeout) {
                ConfirmationOutcome::Approved => None,
                ConfirmationOutcome::Declined => Some(Rejection::ConfirmationDeclined),
                ConfirmationOutcome::TimedOut => Some(Rejection::ConfirmationTimedOut),
                ConfirmationOutcome::Cancelled => Some(Rejection::Cancelled),
            };
            if let Some(rejection) = rejection {
                warn!("[CTRL] Change not applied: {rejection}");
                return Err(rejection);
            }
        }

        self.last_change = Some(now);
        Ok(StimulationCommand {
            target_ma,
            ramp_seconds: self.ramp_seconds(target_ma - current_ma),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyKind;

    fn cfg() -> SafetyConfig {
        SafetyConfig {
            max_ma: 2.0,
            min_ma: 0.0,
            ramp_rate_ma_per_min: 0.5,
            min_seconds_between_changes: 30.0,
            max_session_minutes: 20.0,
            require_human_confirm: false,
            confirm_timeout_sec: 10.0,
        }
    }

    fn arbiter(cfg: SafetyConfig, confirmer: ScriptedConfirmer) -> SafetyArbiter {
        SafetyArbiter::new(cfg, 0.0, Box::new(confirmer))
    }

    fn unconfirmed() -> SafetyArbiter {
        arbiter(cfg(), ScriptedConfirmer::always(ConfirmationOutcome::Approved))
    }

    fn absolute(target_ma: f64) -> ControlProposal {
        ControlProposal::Absolute {
            kind: PolicyKind::Model,
            target_ma,
        }
    }

    fn delta(delta_ma: f64) -> ControlProposal {
        ControlProposal::Delta {
            kind: PolicyKind::Pid,
            delta_ma,
        }
    }

    #[test]
    fn step_limit_follows_ramp_rate() {
        assert!((unconfirmed().max_step_ma() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn clamp_is_idempotent_on_in_bounds_targets() {
        let arb = unconfirmed();
        for current in [0.0, 0.4, 1.0, 1.9, 2.0] {
            for proposed in [-3.0, 0.0, 0.3, 1.1, 1.95, 2.0, 7.0] {
                let once = arb.clamp_target(proposed, current);
                assert!((0.0..=2.0).contains(&once));
                assert_eq!(arb.clamp_target(once, current), once);
            }
        }
    }

    #[test]
    fn clamp_is_monotonic() {
        let arb = unconfirmed();
        for current in [0.0, 0.7, 1.9] {
            let mut prev = f64::NEG_INFINITY;
            for i in -100..=100 {
                let out = arb.clamp_target(i as f64 * 0.05, current);
                assert!(out >= prev, "current={current} proposed={}", i as f64 * 0.05);
                prev = out;
            }
        }
    }

    #[test]
    fn clamp_never_leaves_bounds_even_from_out_of_bounds_current() {
        let arb = unconfirmed();
        assert_eq!(arb.clamp_target(5.0, 3.0), 2.0);
        assert_eq!(arb.clamp_target(-5.0, -1.0), 0.0);
        assert_eq!(arb.clamp_target(f64::NAN, 1.2), 1.2);
    }

    #[test]
    fn large_proposal_near_the_ceiling() {
        let arb = unconfirmed();
        let target = arb.clamp_target(5.0, 1.9);
        assert!(target <= 2.0);
        assert!((target - 1.9).abs() <= 0.25 + 1e-12);
        // from further away the step limit is what binds
        assert!((arb.clamp_target(5.0, 1.0) - 1.25).abs() < 1e-12);
        assert!((arb.clamp_target(-5.0, 1.0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn session_boundary_is_exclusive() {
        let arb = unconfirmed();
        assert!(arb.within_session_limits(0.0));
        assert!(arb.within_session_limits(1200.0));
        assert!(!arb.within_session_limits(1200.0 + 1e-6));
    }

    #[test]
    fn session_limit_rejects_changes() {
        let mut arb = unconfirmed();
        assert_eq!(
            arb.authorize(&delta(0.1), 1.0, 1300.0),
            Err(Rejection::SessionLimitExceeded)
        );
        assert_eq!(arb.last_change(), None);
    }

    #[test]
    fn change_interval_gates_authorization() {
        let mut arb = unconfirmed();
        assert!(arb.can_change_now(0.0));
        let cmd = arb.authorize(&delta(0.1), 1.0, 5.0).unwrap();
        assert!((cmd.target_ma - 1.1).abs() < 1e-12);
        assert!(!arb.can_change_now(34.9));
        match arb.authorize(&delta(0.1), 1.1, 20.0) {
            Err(Rejection::ChangeIntervalActive { remaining_sec }) => {
                assert!((remaining_sec - 15.0).abs() < 1e-9)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(arb.can_change_now(35.0));
        assert!(arb.authorize(&delta(0.1), 1.1, 35.0).is_ok());
    }

    #[test]
    fn remaining_session_and_ramp_reach() {
        let arb = unconfirmed();
        let limit = cfg().max_session_minutes * 60.0;
        assert_eq!(arb.session_remaining(0.0), limit);
        assert_eq!(arb.session_remaining(limit - 15.0), 15.0);
        assert_eq!(arb.session_remaining(limit + 5.0), 0.0);
        let reach = arb.ramp_reach_ma(60.0);
        assert!((reach - cfg().ramp_rate_ma_per_min).abs() < 1e-12);
        assert!((arb.ramp_seconds(reach) - 60.0).abs() < 1e-9);
        assert_eq!(arb.ramp_reach_ma(-1.0), 0.0);
    }

    #[test]
    fn ramp_duration_has_a_floor() {
        let arb = unconfirmed();
        assert_eq!(arb.ramp_seconds(0.0), 2.0);
        assert_eq!(arb.ramp_seconds(0.01), 2.0);
        // 0.25 mA at 0.5 mA/min
        assert!((arb.ramp_seconds(-0.25) - 30.0).abs() < 1e-9);
        let cmd = unconfirmed().authorize(&absolute(5.0), 1.9, 0.0).unwrap();
        assert!((cmd.ramp_seconds - 12.0).abs() < 1e-9);
    }

    #[test]
    fn declined_confirmation_leaves_no_timestamp() {
        let mut cfg = cfg();
        cfg.require_human_confirm = true;
        let confirmer = ScriptedConfirmer::new(
            [
                ConfirmationOutcome::Declined,
                ConfirmationOutcome::TimedOut,
                ConfirmationOutcome::Cancelled,
            ],
            ConfirmationOutcome::Approved,
        );
        let mut arb = arbiter(cfg, confirmer);
        assert_eq!(
            arb.authorize(&delta(0.1), 1.0, 0.0),
            Err(Rejection::ConfirmationDeclined)
        );
        assert_eq!(arb.last_change(), None);
        assert_eq!(
            arb.authorize(&delta(0.1), 1.0, 1.0),
            Err(Rejection::ConfirmationTimedOut)
        );
        assert_eq!(arb.authorize(&delta(0.1), 1.0, 2.0), Err(Rejection::Cancelled));
        assert!(arb.can_change_now(3.0));
        assert!(arb.authorize(&delta(0.1), 1.0, 3.0).is_ok());
        assert_eq!(arb.last_change(), Some(3.0));
    }

    #[test]
    fn confirmer_is_not_consulted_when_not_required() {
        let mut arb = arbiter(cfg(), ScriptedConfirmer::always(ConfirmationOutcome::Declined));
        assert!(arb.authorize(&delta(0.1), 1.0, 0.0).is_ok());
        // zero deltas are still committed
        let mut cfg = cfg();
        cfg.require_human_confirm = true;
        let mut arb = arbiter(cfg, ScriptedConfirmer::always(ConfirmationOutcome::Approved));
        let cmd = arb.authorize(&delta(0.0), 1.0, 0.0).unwrap();
        assert_eq!(cmd.target_ma, 1.0);
        assert_eq!(arb.last_change(), Some(0.0));
    }

    #[test]
    fn scripted_confirmer_counts_requests() {
        let mut c = ScriptedConfirmer::new(
            [ConfirmationOutcome::Declined],
            ConfirmationOutcome::Approved,
        );
        let t = Duration::from_secs(1);
        assert_eq!(c.confirm(1.0, 0.0, t), ConfirmationOutcome::Declined);
        assert_eq!(c.confirm(1.0, 0.0, t), ConfirmationOutcome::Approved);
        assert_eq!(c.asked(), 2);
    }

    #[test]
    fn console_confirmer_honours_stop_signal() {
        let stop = StopSignal::new();
        stop.trigger();
        let mut c = ConsoleConfirmer::new(stop);
        assert_eq!(
            c.confirm(1.0, 0.0, Duration::from_secs(30)),
            ConfirmationOutcome::Cancelled
        );
    }
}
