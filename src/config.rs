// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::types::{AcquisitionMode, PolicyKind, Polarity};

/// Minimum number of discrete ramp steps per second an actuator must emit.
pub const MIN_RAMP_STEPS_PER_SECOND: u32 = 10;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub mode: AcquisitionMode,
    /// Wall-clock session duration in seconds.
    pub seconds: u64,
    pub eeg: EegConfig,
    pub biomarker: BiomarkerConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub burst_detector: BurstDetectorConfig,
    pub stimulator: StimulatorConfig,
    pub safety: SafetyConfig,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EegConfig {
    pub fs: f64,
    pub n_channels: usize,
    pub chunk_sec: f64,
    /// Band name -> [f_low, f_high) in Hz.
    pub bands: BTreeMap<String, [f64; 2]>,
    #[serde(default = "default_true")]
    pub detrend: bool,
    #[serde(default = "default_segment_len")]
    pub segment_len: usize,
}

impl EegConfig {
    /// Samples per channel in one acquisition window.
    pub fn window_samples(&self) -> usize {
        ((self.fs * self.chunk_sec).round() as usize).max(1)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BiomarkerConfig {
    pub smoothing: f64,
    #[serde(rename = "target_beta_uV2")]
    pub target: f64,
    #[serde(default = "default_control_band")]
    pub control_band: String,
    #[serde(default = "default_ratio_band")]
    pub ratio_band: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    pub kind: PolicyKind,
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
    #[serde(default = "default_max_step", rename = "max_step_mA")]
    pub max_step_ma: f64,
    #[serde(default = "default_step_up", rename = "step_up_mA")]
    pub step_up_ma: f64,
    #[serde(default = "default_step_down", rename = "step_down_mA")]
    pub step_down_ma: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_sec: f64,
    #[serde(default = "default_quiet")]
    pub quiet_sec: f64,
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BurstDetectorConfig {
    pub ema_alpha: f64,
    pub z_thresh: f64,
    pub hysteresis: f64,
    pub min_duration_sec: f64,
}

impl Default for BurstDetectorConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.05,
            z_thresh: 2.0,
            hysteresis: 0.5,
            min_duration_sec: 2.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StimulatorConfig {
    pub polarity: String,
    #[serde(rename = "initial_mA")]
    pub initial_ma: f64,
    #[serde(default = "default_steps_per_second")]
    pub steps_per_second: u32,
}

impl StimulatorConfig {
    pub fn polarity(&self) -> Result<Polarity, ControlError> {
        self.polarity.parse()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SafetyConfig {
    #[serde(rename = "max_mA")]
    pub max_ma: f64,
    #[serde(rename = "min_mA")]
    pub min_ma: f64,
    #[serde(rename = "ramp_rate_mA_per_min")]
    pub ramp_rate_ma_per_min: f64,
    pub min_seconds_between_changes: f64,
    pub max_session_minutes: f64,
    pub require_human_confirm: bool,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_sec: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_true() -> bool {
    true
}
fn default_segment_len() -> usize {
    256
}
fn default_control_band() -> String {
    "beta".to_owned()
}
fn default_ratio_band() -> String {
    "alpha".to_owned()
}
fn default_kp() -> f64 {
    0.15
}
fn default_max_step() -> f64 {
    0.2
}
fn default_step_up() -> f64 {
    0.10
}
fn default_step_down() -> f64 {
    0.05
}
fn default_cooldown() -> f64 {
    60.0
}
fn default_quiet() -> f64 {
    120.0
}
fn default_weights_path() -> PathBuf {
    PathBuf::from("models/ml_policy_weights.json")
}
fn default_steps_per_second() -> u32 {
    MIN_RAMP_STEPS_PER_SECOND
}
fn default_confirm_timeout() -> f64 {
    10.0
}
fn default_baud_rate() -> u32 {
    115_200
}

impl Default for Config {
    fn default() -> Self {
        let bands = [("theta", [4.0, 8.0]), ("alpha", [8.0, 13.0]), ("beta", [13.0, 30.0])]
            .into_iter()
            .map(|(name, range)| (name.to_owned(), range))
            .collect();
        Self {
            mode: AcquisitionMode::Simulation,
            seconds: 600,
            eeg: EegConfig {
                fs: 250.0,
                n_channels: 8,
                chunk_sec: 1.0,
                bands,
                detrend: true,
                segment_len: default_segment_len(),
            },
            biomarker: BiomarkerConfig {
                smoothing: 0.3,
                target: 2.0,
                control_band: default_control_band(),
                ratio_band: default_ratio_band(),
            },
            controller: ControllerConfig {
                kind: PolicyKind::Pid,
                kp: default_kp(),
                ki: 0.0,
                kd: 0.0,
                max_step_ma: default_max_step(),
                step_up_ma: default_step_up(),
                step_down_ma: default_step_down(),
                cooldown_sec: default_cooldown(),
                quiet_sec: default_quiet(),
                weights_path: default_weights_path(),
            },
            burst_detector: BurstDetectorConfig::default(),
            stimulator: StimulatorConfig {
                polarity: "anodal".to_owned(),
                initial_ma: 1.0,
                steps_per_second: default_steps_per_second(),
            },
            safety: SafetyConfig {
                max_ma: 2.0,
                min_ma: 0.0,
                ramp_rate_ma_per_min: 0.5,
                min_seconds_between_changes: 30.0,
                max_session_minutes: 20.0,
                require_human_confirm: true,
                confirm_timeout_sec: default_confirm_timeout(),
            },
            serial: None,
        }
    }
}

impl Config {
    /// Applies command-line overrides. Call before [`Config::validate`].
    pub fn apply_overrides(&mut self, mode: Option<AcquisitionMode>, seconds: Option<u64>) {
        if let Some(mode) = mode {
            self.mode = mode;
        }
        if let Some(seconds) = seconds {
            self.seconds = seconds;
        }
    }

    /// Every scalar setting that must be a finite number.
    fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        let (eeg, bio, ctrl) = (&self.eeg, &self.biomarker, &self.controller);
        let (burst, stim, safety) = (&self.burst_detector, &self.stimulator, &self.safety);
        vec![
            ("eeg.fs", eeg.fs),
            ("eeg.chunk_sec", eeg.chunk_sec),
            ("biomarker.smoothing", bio.smoothing),
            ("biomarker.target_beta_uV2", bio.target),
            ("controller.kp", ctrl.kp),
            ("controller.ki", ctrl.ki),
            ("controller.kd", ctrl.kd),
            ("controller.max_step_mA", ctrl.max_step_ma),
            ("controller.step_up_mA", ctrl.step_up_ma),
            ("controller.step_down_mA", ctrl.step_down_ma),
            ("controller.cooldown_sec", ctrl.cooldown_sec),
            ("controller.quiet_sec", ctrl.quiet_sec),
            ("burst_detector.ema_alpha", burst.ema_alpha),
            ("burst_detector.z_thresh", burst.z_thresh),
            ("burst_detector.hysteresis", burst.hysteresis),
            ("burst_detector.min_duration_sec", burst.min_duration_sec),
            ("stimulator.initial_mA", stim.initial_ma),
            ("safety.max_mA", safety.max_ma),
            ("safety.min_mA", safety.min_ma),
            ("safety.ramp_rate_mA_per_min", safety.ramp_rate_ma_per_min),
            ("safety.min_seconds_between_changes", safety.min_seconds_between_changes),
            ("safety.max_session_minutes", safety.max_session_minutes),
            ("safety.confirm_timeout_sec", safety.confirm_timeout_sec),
        ]
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        let invalid = |msg: String| Err(ControlError::InvalidConfiguration(msg));

        // NaN slips through every ordered comparison below
        for (field, value) in self.numeric_fields() {
            if !value.is_finite() {
                return invalid(format!("{field} must be a finite number, got {value}"));
            }
        }

        let eeg = &self.eeg;
        if !(eeg.fs > 0.0) {
            return Err(ControlError::InvalidSampleRate);
        }
        if eeg.n_channels == 0 {
            return invalid("eeg.n_channels must be at least 1".into());
        }
        if !(eeg.chunk_sec > 0.0) {
            return invalid("eeg.chunk_sec must be positive".into());
        }
        if eeg.segment_len == 0 {
            return invalid("eeg.segment_len must be at least 1".into());
        }
        for (name, [low, high]) in &eeg.bands {
            if !low.is_finite() || !high.is_finite() || *low < 0.0 || high < low {
                return invalid(format!("band `{name}` has an invalid range [{low}, {high})"));
            }
        }
        let bio = &self.biomarker;
        for band in [&bio.control_band, &bio.ratio_band] {
            if !eeg.bands.contains_key(band) {
                return invalid(format!("band `{band}` is not defined under eeg.bands"));
            }
        }
        if !(bio.smoothing > 0.0 && bio.smoothing <= 1.0) {
            return invalid("biomarker.smoothing must be in (0, 1]".into());
        }

        let ctrl = &self.controller;
        if ctrl.max_step_ma < 0.0 || ctrl.step_up_ma < 0.0 || ctrl.step_down_ma < 0.0 {
            return invalid("controller step sizes must be non-negative".into());
        }
        if ctrl.cooldown_sec < 0.0 || ctrl.quiet_sec < 0.0 {
            return invalid("controller timers must be non-negative".into());
        }

        let burst = &self.burst_detector;
        if !(burst.ema_alpha > 0.0 && burst.ema_alpha <= 1.0) {
            return invalid("burst_detector.ema_alpha must be in (0, 1]".into());
        }
        if burst.hysteresis < 0.0 || burst.min_duration_sec < 0.0 {
            return invalid("burst_detector hysteresis and duration must be non-negative".into());
        }

        let safety = &self.safety;
        if safety.min_ma > safety.max_ma {
            return invalid(format!(
                "safety.min_mA ({}) exceeds safety.max_mA ({})",
                safety.min_ma, safety.max_ma
            ));
        }
        if !(safety.ramp_rate_ma_per_min > 0.0) {
            return invalid("safety.ramp_rate_mA_per_min must be positive".into());
        }
        if safety.min_seconds_between_changes < 0.0
            || safety.max_session_minutes < 0.0
            || safety.confirm_timeout_sec < 0.0
        {
            return invalid("safety intervals must be non-negative".into());
        }

        let stim = &self.stimulator;
        stim.polarity()?;
        if stim.initial_ma < safety.min_ma || stim.initial_ma > safety.max_ma {
            return invalid(format!(
                "stimulator.initial_mA ({}) is outside [{}, {}]",
                stim.initial_ma, safety.min_ma, safety.max_ma
            ));
        }
        if stim.steps_per_second < MIN_RAMP_STEPS_PER_SECOND {
            return invalid(format!(
                "stimulator.steps_per_second must be at least {MIN_RAMP_STEPS_PER_SECOND}"
            ));
        }

        if self.mode == AcquisitionMode::Serial && self.serial.is_none() {
            return invalid("serial mode requires a `serial` section".into());
        }
        Ok(())
    }
}

/// Reads and parses a YAML config file without validating it.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ControlError> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        ControlError::InvalidConfiguration(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_config(&config_str)
}

pub fn parse_config(yaml: &str) -> Result<Config, ControlError> {
    Ok(serde_yaml::from_str(yaml)?)
}
