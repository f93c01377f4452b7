//! Closed-loop session: acquire → features → burst state → policy → arbiter
//! → actuator, one window per cycle, until time runs out or something stops
//! the loop.
//!
//! However the loop ends, the actuator is stopped (output at zero) and
//! disconnected before [`ClosedLoop::run`] returns.

use std::fmt;

use log::{debug, error, info, warn};

use crate::bandpower::{BandpowerEstimator, FrequencyBand};
use crate::burst::BurstDetector;
use crate::clock::Clock;
use crate::config::Config;
use crate::drivers::{SignalSource, SignalWindow};
use crate::error::ControlError;
use crate::policy::{ControlPolicy, Observation};
use crate::safety::{Confirmer, Rejection, SafetyArbiter, MIN_RAMP_SECONDS};
use crate::stimulator::{RampOutcome, Stimulator};
use crate::stop::StopSignal;
use crate::types::{PolicyKind, Polarity};

/// Changes smaller than this are committed without moving the actuator.
const NEGLIGIBLE_CHANGE_MA: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    DurationElapsed,
    SessionLimit,
    SourceExhausted,
    Interrupted,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::DurationElapsed => f.write_str("duration elapsed"),
            SessionEnd::SessionLimit => f.write_str("session limit reached"),
            SessionEnd::SourceExhausted => f.write_str("signal source exhausted"),
            SessionEnd::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub cycles: u64,
    /// Authorized changes, including zero-size ones.
    pub changes: u64,
    pub end: SessionEnd,
}

pub struct ClosedLoop<S: Stimulator> {
    source: Box<dyn SignalSource>,
    stimulator: S,
    estimator: BandpowerEstimator,
    burst: BurstDetector,
    policy: ControlPolicy,
    arbiter: SafetyArbiter,
    clock: Box<dyn Clock>,
    stop: StopSignal,
    polarity: Polarity,
    initial_ma: f64,
    target: f64,
    control_band: String,
    ratio_band: String,
    n_channels: usize,
    window_samples: usize,
    started_at: f64,
    duration_sec: f64,
    cycles: u64,
    changes: u64,
    /// Set once `connect` has been attempted and cleared by `release`.
    engaged: bool,
}

impl<S: Stimulator> ClosedLoop<S> {
    /// Wires a session from an already validated configuration.
    ///
    /// An unavailable model policy falls back to PID; a bad polarity is fatal.
    pub fn from_config(
        cfg: &Config,
        source: Box<dyn SignalSource>,
        stimulator: S,
        confirmer: Box<dyn Confirmer>,
        clock: Box<dyn Clock>,
        stop: StopSignal,
    ) -> Result<Self, ControlError> {
        let polarity = cfg.stimulator.polarity()?;
        let bands = cfg
            .eeg
            .bands
            .iter()
            .map(|(name, [low, high])| FrequencyBand::new(name.as_str(), *low, *high))
            .collect();
        let estimator = BandpowerEstimator::new(
            bands,
            cfg.biomarker.control_band.as_str(),
            cfg.biomarker.smoothing,
            cfg.eeg.segment_len,
            cfg.eeg.detrend,
        );
        let policy = ControlPolicy::from_config(&cfg.controller);
        let started_at = clock.now();
        let arbiter = SafetyArbiter::new(cfg.safety.clone(), started_at, confirmer);

        Ok(Self {
            source,
            stimulator,
            estimator,
            burst: BurstDetector::new(cfg.burst_detector.clone()),
            policy,
            arbiter,
            clock,
            stop,
            polarity,
            initial_ma: cfg.stimulator.initial_ma,
            target: cfg.biomarker.target,
            control_band: cfg.biomarker.control_band.clone(),
            ratio_band: cfg.biomarker.ratio_band.clone(),
            n_channels: cfg.eeg.n_channels,
            window_samples: cfg.eeg.window_samples(),
            started_at,
            duration_sec: cfg.seconds as f64,
            cycles: 0,
            changes: 0,
            engaged: false,
        })
    }

    pub fn stimulator(&self) -> &S {
        &self.stimulator
    }

    pub fn policy_kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    /// Runs the session to completion. The actuator is released on every
    /// path, including errors.
    pub fn run(&mut self) -> Result<SessionSummary, ControlError> {
        info!(
            "[START] session={}s policy={} target={:.3} polarity={}",
            self.duration_sec,
            self.policy.kind(),
            self.target,
            self.polarity
        );
        let outcome = self.start_actuator().and_then(|ramp| match ramp {
            RampOutcome::Completed => self.control_loop(),
            RampOutcome::Cancelled => Ok(SessionEnd::Interrupted),
        });
        if let Err(e) = &outcome {
            error!("[STOP] Session aborted: {e}");
        }
        let released = self.release();
        let end = outcome?;
        released?;

        let summary = SessionSummary {
            cycles: self.cycles,
            changes: self.changes,
            end,
        };
        info!(
            "[END] {} after {} cycles. Applied changes: {}",
            summary.end, summary.cycles, summary.changes
        );
        Ok(summary)
    }

    fn start_actuator(&mut self) -> Result<RampOutcome, ControlError> {
        self.engaged = true;
        self.stimulator.connect()?;
        self.stimulator.set_polarity(self.polarity)?;
        self.stimulator.start()?;
        let current = self.stimulator.current_ma();
        let delta = self.initial_ma - current;
        let now = self.clock.now();
        let budget = (self.started_at + self.duration_sec - now)
            .min(self.arbiter.session_remaining(now));
        let mut target = self.initial_ma;
        let mut seconds = self.arbiter.ramp_seconds(delta);
        if seconds > budget {
            if budget < MIN_RAMP_SECONDS {
                warn!("[STIM] Only {budget:.1}s left in the session, skipping the startup ramp");
                return Ok(RampOutcome::Completed);
            }
            // same rate, shorter ramp
            target = current + self.arbiter.ramp_reach_ma(budget).min(delta.abs()).copysign(delta);
            seconds = budget;
            warn!(
                "[STIM] Startup ramp capped at {target:.3} mA (initial {:.3} mA) to fit {budget:.1}s",
                self.initial_ma
            );
        }
        info!("[STIM] Ramping to initial {target:.3} mA over {seconds:.1}s");
        self.stimulator.ramp_to(target, seconds, &self.stop)
    }

    fn control_loop(&mut self) -> Result<SessionEnd, ControlError> {
        let deadline = self.started_at + self.duration_sec;
        loop {
            if self.stop.is_triggered() {
                info!("[STOP] Interrupted by user.");
                return Ok(SessionEnd::Interrupted);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(SessionEnd::DurationElapsed);
            }
            if !self.arbiter.within_session_limits(now) {
                return Ok(SessionEnd::SessionLimit);
            }
            let Some(window) = self.source.next_window()? else {
                if self.stop.is_triggered() {
                    info!("[STOP] Interrupted by user.");
                    return Ok(SessionEnd::Interrupted);
                }
                return Ok(SessionEnd::SourceExhausted);
            };
            window.expect_shape(self.n_channels, self.window_samples)?;
            self.cycles += 1;
            if let Some(end) = self.cycle(&window)? {
                return Ok(end);
            }
        }
    }

    /// One pass through the pipeline. Returns an end reason if the arbiter
    /// or the stop signal ended the session.
    fn cycle(
        &mut self,
        window: &SignalWindow,
    ) -> Result<Option<SessionEnd>, ControlError> {
        let now = self.clock.now();
        let features = self.estimator.features(window);
        let biomarker = features.biomarker;
        let ratio_band_power = features.power(&self.ratio_band).unwrap_or(0.0);
        let ratio = biomarker / ratio_band_power.max(1e-6);
        info!(
            "[EEG] {cb}={:.3} {cb}_s={biomarker:.3} {rb}={ratio_band_power:.3} ratio={ratio:.3}",
            features.raw_biomarker(),
            cb = self.control_band,
            rb = self.ratio_band,
        );

        let event = self.burst.update(biomarker, now);
        if event.just_started {
            info!(
                "[BURST] started (z={:.2}, baseline={:.3})",
                event.z_score, event.baseline
            );
        } else if event.just_ended {
            info!("[BURST] ended (z={:.2})", event.z_score);
        }

        if !self.arbiter.can_change_now(now) {
            return Ok(None);
        }
        let proposal = self.policy.propose(&Observation {
            biomarker,
            target: self.target,
            ratio_band_power,
            ratio,
            burst: event,
            now,
        });
        let current = self.stimulator.current_ma();
        let command = match self.arbiter.authorize(&proposal, current, now) {
            Ok(command) => command,
            Err(Rejection::SessionLimitExceeded) => return Ok(Some(SessionEnd::SessionLimit)),
            Err(Rejection::Cancelled) => return Ok(Some(SessionEnd::Interrupted)),
            Err(_) => return Ok(None),
        };
        self.changes += 1;
        if (command.target_ma - current).abs() < NEGLIGIBLE_CHANGE_MA {
            debug!("[CTRL] No change at {current:.3} mA");
            return Ok(None);
        }
        info!(
            "[CTRL] Ramping {current:.3} -> {:.3} mA over {:.1}s",
            command.target_ma, command.ramp_seconds
        );
        match self
            .stimulator
            .ramp_to(command.target_ma, command.ramp_seconds, &self.stop)?
        {
            RampOutcome::Completed => Ok(None),
            RampOutcome::Cancelled => {
                info!("[STOP] Ramp interrupted at {:.3} mA", self.stimulator.current_ma());
                Ok(Some(SessionEnd::Interrupted))
            }
        }
    }

    /// Stop then disconnect. Both are attempted even if the first fails.
    fn release(&mut self) -> Result<(), ControlError> {
        if !self.engaged {
            return Ok(());
        }
        self.engaged = false;
        let stopped = self.stimulator.stop();
        if let Err(e) = &stopped {
            warn!("[STIM] stop failed: {e}");
        }
        let disconnected = self.stimulator.disconnect();
        if let Err(e) = &disconnected {
            warn!("[STIM] disconnect failed: {e}");
        }
        stopped.and(disconnected)
    }
}

impl<S: Stimulator> Drop for ClosedLoop<S> {
    fn drop(&mut self) {
        if self.engaged {
            let _ = self.release();
        }
    }
}
