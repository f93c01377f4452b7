//! Control policies: map biomarker state to a proposed current change.
//!
//! The variant is chosen once from configuration; each variant reads the
//! parts of an [`Observation`] it needs.
pub mod model;
pub mod pid;
pub mod threshold;

pub use model::{ModelParameters, ModelPolicy};
pub use pid::PidPolicy;
pub use threshold::ThresholdPolicy;

use log::warn;

use crate::config::ControllerConfig;
use crate::error::ControlError;
use crate::types::{BurstEvent, ControlProposal, PolicyKind};

/// Number of features fed to the model policy, see [`Observation::model_features`].
pub const MODEL_FEATURES: usize = 3;

/// Everything a policy may look at in one cycle.
#[derive(Clone, Copy, Debug)]
pub struct Observation {
    /// Smoothed control biomarker.
    pub biomarker: f64,
    pub target: f64,
    /// Power of the ratio band (alpha by default).
    pub ratio_band_power: f64,
    /// biomarker / ratio band power.
    pub ratio: f64,
    pub burst: BurstEvent,
    pub now: f64,
}

impl Observation {
    pub fn model_features(&self) -> [f64; MODEL_FEATURES] {
        [self.biomarker, self.ratio_band_power, self.ratio]
    }
}

pub enum ControlPolicy {
    Pid(PidPolicy),
    Threshold(ThresholdPolicy),
    Model(ModelPolicy),
}

impl ControlPolicy {
    pub fn pid_from_config(cfg: &ControllerConfig) -> Self {
        ControlPolicy::Pid(PidPolicy::new(cfg.kp, cfg.ki, cfg.kd, cfg.max_step_ma))
    }

    /// Builds the configured policy, failing if the model cannot be loaded.
    pub fn try_from_config(cfg: &ControllerConfig) -> Result<Self, ControlError> {
        Ok(match cfg.kind {
            PolicyKind::Pid => Self::pid_from_config(cfg),
            PolicyKind::Threshold => ControlPolicy::Threshold(ThresholdPolicy::new(
                cfg.step_up_ma,
                cfg.step_down_ma,
                cfg.cooldown_sec,
                cfg.quiet_sec,
            )),
            PolicyKind::Model => {
                ControlPolicy::Model(ModelPolicy::load(&cfg.weights_path, MODEL_FEATURES)?)
            }
        })
    }

    /// Builds the configured policy, substituting the PID policy when the
    /// model parameters are unavailable.
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        match Self::try_from_config(cfg) {
            Ok(policy) => policy,
            Err(e) => {
                warn!("[WARN] Model policy unavailable: {e}. Falling back to PID.");
                Self::pid_from_config(cfg)
            }
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            ControlPolicy::Pid(_) => PolicyKind::Pid,
            ControlPolicy::Threshold(_) => PolicyKind::Threshold,
            ControlPolicy::Model(_) => PolicyKind::Model,
        }
    }

    pub fn propose(&mut self, obs: &Observation) -> ControlProposal {
        match self {
            ControlPolicy::Pid(pid) => pid.propose(obs.biomarker, obs.target),
            ControlPolicy::Threshold(threshold) => threshold.propose(&obs.burst, obs.now),
            ControlPolicy::Model(model) => model.propose(&obs.model_features()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn observation() -> Observation {
        Observation {
            biomarker: 1.0,
            target: 1.0,
            ratio_band_power: 2.0,
            ratio: 0.5,
            burst: BurstEvent::default(),
            now: 0.0,
        }
    }

    #[test]
    fn missing_model_falls_back_to_pid() {
        let mut cfg = Config::default().controller;
        cfg.kind = PolicyKind::Model;
        cfg.weights_path = "/no/such/dir/weights.json".into();
        assert!(matches!(
            ControlPolicy::try_from_config(&cfg),
            Err(ControlError::ModelUnavailable(_))
        ));
        let mut policy = ControlPolicy::from_config(&cfg);
        assert_eq!(policy.kind(), PolicyKind::Pid);
        assert_eq!(
            policy.propose(&observation()),
            ControlProposal::Delta {
                kind: PolicyKind::Pid,
                delta_ma: 0.0
            }
        );
    }

    #[test]
    fn selects_configured_variant() {
        let mut cfg = Config::default().controller;
        cfg.kind = PolicyKind::Threshold;
        assert_eq!(ControlPolicy::from_config(&cfg).kind(), PolicyKind::Threshold);
        cfg.kind = PolicyKind::Pid;
        assert_eq!(ControlPolicy::from_config(&cfg).kind(), PolicyKind::Pid);
    }

    #[test]
    fn model_variant_reads_feature_vector() {
        let params = ModelParameters {
            w1: vec![vec![0.0], vec![1.0], vec![0.0]],
            b1: vec![0.0],
            w2: vec![vec![0.25]],
            b2: vec![1.0],
        };
        let model = ModelPolicy::from_parameters(params, MODEL_FEATURES).unwrap();
        let mut policy = ControlPolicy::Model(model);
        // 0.25 * ratio band power (2.0) + 1.0
        assert_eq!(
            policy.propose(&observation()),
            ControlProposal::Absolute {
                kind: PolicyKind::Model,
                target_ma: 1.5
            }
        );
    }
}
