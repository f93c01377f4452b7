//! Closed-loop neurostimulation control.
//!
//! Each cycle takes one EEG window, estimates band power, tracks beta bursts,
//! asks the configured control policy for a change and lets the safety
//! arbiter decide whether (and how fast) the stimulator may follow.
pub mod bandpower;
pub mod burst;
pub mod clock;
pub mod config;
pub mod drivers;
pub mod error;
pub mod policy;
pub mod safety;
pub mod session;
pub mod stimulator;
pub mod stop;
pub mod types;

pub use config::{load_config, Config};
pub use error::ControlError;
pub use session::{ClosedLoop, SessionEnd, SessionSummary};
