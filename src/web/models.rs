//! Contains the data models for API requests and responses.

use crate::windlass::WindlassStatus;
use serde::{Deserialize, Serialize};

/// Current windlass status plus what the calling operator may do next.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: WindlassStatus,
    pub message: String,
    pub in_control: bool,
    /// A run completed since this caller last asked. Only the caller in
    /// control consumes completions.
    pub completed: bool,
    pub set_enabled: bool,
    pub pause_enabled: bool,
    pub resume_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub identity: String,
    pub in_control: bool,
}

/// Body of `POST /api/v1/anchor/{action}`. Manual moves default to the
/// configured manual range.
#[derive(Debug, Default, Deserialize)]
pub struct AnchorRequest {
    #[serde(default)]
    pub meters: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AnchorResponse {
    pub action: String,
    pub accepted: bool,
    /// Bounded target of an accepted manual move.
    pub manual_target: Option<f64>,
    pub target_length: f64,
    pub actual_length: f64,
}

/// Either an explicit length or a depth to compute the deploy length from.
#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    #[serde(default)]
    pub target_length: Option<f64>,
    #[serde(default)]
    pub depth: Option<f64>,
    #[serde(default)]
    pub use_safety: bool,
}

#[derive(Debug, Serialize)]
pub struct TargetResponse {
    pub target_length: f64,
}

/// Body of `POST /api/v1/settings`. Missing fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub chain_length: Option<f64>,
    #[serde(default)]
    pub down_speed: Option<f64>,
    #[serde(default)]
    pub up_speed: Option<f64>,
    #[serde(default)]
    pub boat_length: Option<f64>,
    #[serde(default)]
    pub min_length_up: Option<f64>,
    #[serde(default)]
    pub manual_range: Option<f64>,
    #[serde(default)]
    pub allow_retract: Option<bool>,
}

impl SettingsRequest {
    pub fn changes_boat(&self) -> bool {
        self.chain_length.is_some()
            || self.down_speed.is_some()
            || self.up_speed.is_some()
            || self.boat_length.is_some()
            || self.min_length_up.is_some()
    }

    pub fn lengths(&self) -> impl Iterator<Item = f64> + '_ {
        [
            self.chain_length,
            self.down_speed,
            self.up_speed,
            self.boat_length,
            self.min_length_up,
            self.manual_range,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub chain_length: f64,
    pub down_speed: f64,
    pub up_speed: f64,
    pub boat_length: f64,
    pub min_length_up: f64,
    pub manual_range: f64,
    pub allow_retract: bool,
}

#[derive(Debug, Serialize)]
pub struct QuitResponse {
    pub quit: bool,
    pub actual_length: f64,
}
