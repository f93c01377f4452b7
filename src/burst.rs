//! Beta burst detection on the streaming biomarker.
//!
//! The biomarker is compared against an exponentially weighted baseline
//! (mean and variance). A burst starts once the z-score has stayed at or
//! above `z_thresh` for `min_duration_sec`, and ends as soon as it falls to
//! `z_thresh - hysteresis` or below.

use crate::config::BurstDetectorConfig;
use crate::types::BurstEvent;

/// Floor applied to the variance before taking the square root.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Exponentially weighted mean and variance of the biomarker.
#[derive(Clone, Copy, Debug, Default)]
struct Baseline {
    mean: Option<f64>,
    variance: f64,
}

impl Baseline {
    fn update(&mut self, x: f64, alpha: f64) {
        match self.mean {
            None => {
                self.mean = Some(x);
                self.variance = 0.0;
            }
            Some(prev) => {
                let mean = prev + alpha * (x - prev);
                // weighted by the pre-update mean so the new sample is not
                // measured against itself
                self.variance = (1.0 - alpha) * (self.variance + alpha * (x - prev) * (x - mean));
                self.mean = Some(mean);
            }
        }
    }

    fn mean(&self) -> f64 {
        self.mean.unwrap_or(0.0)
    }

    fn z_score(&self, x: f64) -> f64 {
        if self.variance == 0.0 {
            return 0.0;
        }
        (x - self.mean()) / self.variance.max(VARIANCE_FLOOR).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BurstState {
    /// `above_since` is when the z-score last crossed the entry threshold.
    Quiescent { above_since: Option<f64> },
    Active,
}

pub struct BurstDetector {
    cfg: BurstDetectorConfig,
    baseline: Baseline,
    state: BurstState,
}

impl BurstDetector {
    pub fn new(cfg: BurstDetectorConfig) -> Self {
        Self {
            cfg,
            baseline: Baseline::default(),
            state: BurstState::Quiescent { above_since: None },
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == BurstState::Active
    }

    pub fn baseline(&self) -> f64 {
        self.baseline.mean()
    }

    /// Feeds one biomarker value observed at `now` (seconds, non-decreasing).
    pub fn update(&mut self, value: f64, now: f64) -> BurstEvent {
        self.baseline.update(value, self.cfg.ema_alpha);
        let z = self.baseline.z_score(value);
        let exit_threshold = self.cfg.z_thresh - self.cfg.hysteresis;

        let mut just_started = false;
        let mut just_ended = false;
        self.state = match self.state {
            BurstState::Quiescent { above_since } => {
                if z >= self.cfg.z_thresh {
                    let since = above_since.unwrap_or(now);
                    if now - since >= self.cfg.min_duration_sec {
                        just_started = true;
                        BurstState::Active
                    } else {
                        BurstState::Quiescent {
                            above_since: Some(since),
                        }
                    }
                } else {
                    BurstState::Quiescent { above_since: None }
                }
            }
            BurstState::Active => {
                if z <= exit_threshold {
                    just_ended = true;
                    BurstState::Quiescent { above_since: None }
                } else {
                    BurstState::Active
                }
            }
        };

        BurstEvent {
            active: self.is_active(),
            just_started,
            just_ended,
            z_score: z,
            baseline: self.baseline.mean(),
        }
    }
}
