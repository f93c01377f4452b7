// actuator side of the loop
use std::time::Duration;

use log::{debug, info};

use crate::error::ControlError;
use crate::stop::StopSignal;
use crate::types::Polarity;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RampOutcome {
    Completed,
    /// The stop signal fired; output was left at the last applied step.
    Cancelled,
}

/// Stimulation actuator. `stop` must always leave the output at zero.
pub trait Stimulator {
    fn connect(&mut self) -> Result<(), ControlError>;
    fn disconnect(&mut self) -> Result<(), ControlError>;
    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), ControlError>;
    fn polarity(&self) -> Polarity;
    fn start(&mut self) -> Result<(), ControlError>;
    fn stop(&mut self) -> Result<(), ControlError>;
    fn current_ma(&self) -> f64;
    /// Moves linearly to `target_ma` over `seconds`.
    fn ramp_to(
        &mut self,
        target_ma: f64,
        seconds: f64,
        stop: &StopSignal,
    ) -> Result<RampOutcome, ControlError>;
}

/// Linear interpolation from `start_ma` to `target_ma` in evenly spaced steps.
#[derive(Clone, Copy, Debug)]
pub struct RampPlan {
    start_ma: f64,
    target_ma: f64,
    steps: usize,
    step_duration: Duration,
}

impl RampPlan {
    pub fn new(start_ma: f64, target_ma: f64, seconds: f64, steps_per_second: u32) -> Self {
        if seconds.is_nan() || seconds <= 0.0 {
            return Self {
                start_ma,
                target_ma,
                steps: 1,
                step_duration: Duration::ZERO,
            };
        }
        let steps = ((seconds * f64::from(steps_per_second)) as usize).max(1);
        Self {
            start_ma,
            target_ma,
            steps,
            step_duration: Duration::from_secs_f64(seconds / steps as f64),
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn step_duration(&self) -> Duration {
        self.step_duration
    }

    /// Output after each step; the last value is exactly `target_ma`.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        (1..=self.steps).map(move |i| {
            if i == self.steps {
                self.target_ma
            } else {
                self.start_ma + (self.target_ma - self.start_ma) * (i as f64 / self.steps as f64)
            }
        })
    }
}

/// Logs every output instead of driving hardware.
pub struct MockStimulator {
    polarity: Polarity,
    current_ma: f64,
    on: bool,
    connected: bool,
    steps_per_second: u32,
    paced: bool,
    history: Vec<f64>,
    fail_after: Option<usize>,
}

impl MockStimulator {
    pub fn new(steps_per_second: u32) -> Self {
        Self {
            polarity: Polarity::Anodal,
            current_ma: 0.0,
            on: false,
            connected: false,
            steps_per_second: steps_per_second.max(1),
            paced: true,
            history: Vec::new(),
            fail_after: None,
        }
    }

    /// Ramps apply every step immediately instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Ramp steps start failing once `outputs` values have been applied.
    pub fn failing_after(mut self, outputs: usize) -> Self {
        self.fail_after = Some(outputs);
        self
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Every output value applied so far, including the zero from `stop`.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    fn apply_output(&mut self, ma: f64) {
        if self.on {
            debug!("[MockStim] output => {ma:.3} mA ({})", self.polarity);
        } else {
            debug!("[MockStim] (standby) => {ma:.3} mA");
        }
        self.current_ma = ma;
        self.history.push(ma);
    }
}

impl Stimulator for MockStimulator {
    fn connect(&mut self) -> Result<(), ControlError> {
        self.connected = true;
        info!("[MockStim] connected.");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ControlError> {
        self.connected = false;
        info!("[MockStim] disconnected.");
        Ok(())
    }

    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), ControlError> {
        self.polarity = polarity;
        info!("[MockStim] polarity set to {polarity}.");
        Ok(())
    }

    fn polarity(&self) -> Polarity {
        self.polarity
    }

    fn start(&mut self) -> Result<(), ControlError> {
        if !self.connected {
            return Err(ControlError::Actuator("start before connect".into()));
        }
        self.on = true;
        info!("[MockStim] started.");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ControlError> {
        self.on = false;
        self.apply_output(0.0);
        info!("[MockStim] stopped, output at 0 mA.");
        Ok(())
    }

    fn current_ma(&self) -> f64 {
        self.current_ma
    }

    fn ramp_to(
        &mut self,
        target_ma: f64,
        seconds: f64,
        stop: &StopSignal,
    ) -> Result<RampOutcome, ControlError> {
        let plan = RampPlan::new(self.current_ma, target_ma, seconds, self.steps_per_second);
        for value in plan.values() {
            if stop.is_triggered() {
                return Ok(RampOutcome::Cancelled);
            }
            if self.fail_after.is_some_and(|n| self.history.len() >= n) {
                return Err(ControlError::Actuator(format!(
                    "output rejected at {value:.3} mA"
                )));
            }
            self.apply_output(value);
            if self.paced && !stop.sleep(plan.step_duration()) {
                return Ok(RampOutcome::Cancelled);
            }
        }
        Ok(RampOutcome::Completed)
    }
}
