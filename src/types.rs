// src/types.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

// Stimulation current direction
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Polarity {
    Anodal,
    Cathodal,
}

impl FromStr for Polarity {
    type Err = ControlError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anodal" => Ok(Polarity::Anodal),
            "cathodal" => Ok(Polarity::Cathodal),
            _ => Err(ControlError::InvalidPolarity(s.to_owned())),
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Anodal => f.write_str("anodal"),
            Polarity::Cathodal => f.write_str("cathodal"),
        }
    }
}

// Where signal windows come from
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    #[default]
    Simulation,
    Serial,
}

impl FromStr for AcquisitionMode {
    type Err = ControlError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" | "sim" => Ok(AcquisitionMode::Simulation),
            "serial" => Ok(AcquisitionMode::Serial),
            other => Err(ControlError::InvalidConfiguration(format!(
                "unknown acquisition mode `{other}`"
            ))),
        }
    }
}

// Which control policy produced a proposal
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum PolicyKind {
    #[serde(rename = "bandpower_pid")]
    Pid,
    #[serde(rename = "burst_threshold")]
    Threshold,
    #[serde(rename = "ml")]
    Model,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Pid => f.write_str("pid"),
            PolicyKind::Threshold => f.write_str("threshold"),
            PolicyKind::Model => f.write_str("model"),
        }
    }
}

/// Snapshot of the burst detector after one update.
///
/// `just_started` / `just_ended` are edge-triggered: each is true for exactly
/// one update per transition.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BurstEvent {
    pub active: bool,
    pub just_started: bool,
    pub just_ended: bool,
    pub z_score: f64,
    pub baseline: f64,
}

/// Output of a control policy, consumed immediately by the safety arbiter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlProposal {
    /// Signed change relative to the actuator's present output (mA).
    Delta { kind: PolicyKind, delta_ma: f64 },
    /// Absolute output the policy would like to reach (mA).
    Absolute { kind: PolicyKind, target_ma: f64 },
}

impl ControlProposal {
    pub fn kind(&self) -> PolicyKind {
        match self {
            ControlProposal::Delta { kind, .. } | ControlProposal::Absolute { kind, .. } => *kind,
        }
    }

    /// Absolute target implied by this proposal given the present output.
    pub fn resolve(&self, current_ma: f64) -> f64 {
        match self {
            ControlProposal::Delta { delta_ma, .. } => current_ma + delta_ma,
            ControlProposal::Absolute { target_ma, .. } => *target_ma,
        }
    }
}

/// The only output allowed to reach an actuator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StimulationCommand {
    pub target_ma: f64,
    pub ramp_seconds: f64,
}
