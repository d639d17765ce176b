//! Dead-reckoned chain position.
//!
//! Nothing in here touches hardware or time sources: the run loop measures
//! elapsed time and feeds it to [`PositionModel::advance`].

use crate::config::WindlassParameters;
use serde::Serialize;

/// Round to one decimal, the resolution the operator sees.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Idle,
    /// Deploying chain, anchor going down.
    Extending,
    /// Retrieving chain, anchor coming up.
    Retracting,
}

impl Direction {
    /// Operator-facing label.
    pub fn label(&self, idle_as_blank: bool) -> &'static str {
        match self {
            Direction::Extending => "down",
            Direction::Retracting => "up",
            Direction::Idle if idle_as_blank => "",
            Direction::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionModel {
    pub chain_length: f64,
    pub min_length_up: f64,
    /// Metres per minute.
    pub down_speed: f64,
    /// Metres per minute.
    pub up_speed: f64,
    pub boat_length: f64,
    pub target_length: f64,
    pub actual_length: f64,
    pub manual_extend_target: f64,
    pub manual_retract_target: f64,
    pub threshold: f64,
}

impl PositionModel {
    pub fn new(params: WindlassParameters, threshold: f64) -> Self {
        Self {
            chain_length: params.chain_length,
            min_length_up: params.min_length_up,
            down_speed: params.down_speed,
            up_speed: params.up_speed,
            boat_length: params.boat_length,
            target_length: 0.0,
            actual_length: 0.0,
            manual_extend_target: 0.0,
            manual_retract_target: 0.0,
            threshold,
        }
    }

    pub fn update_parameters(&mut self, params: WindlassParameters) {
        self.chain_length = params.chain_length;
        self.min_length_up = params.min_length_up;
        self.down_speed = params.down_speed;
        self.up_speed = params.up_speed;
        self.boat_length = params.boat_length;
        self.clamp();
        self.target_length = self.target_length.clamp(0.0, self.chain_length);
    }

    pub fn down_speed_per_second(&self) -> f64 {
        self.down_speed / 60.0
    }

    pub fn up_speed_per_second(&self) -> f64 {
        self.up_speed / 60.0
    }

    pub fn speed_per_second(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Extending => self.down_speed_per_second(),
            Direction::Retracting => self.up_speed_per_second(),
            Direction::Idle => 0.0,
        }
    }

    /// Direction of the pending manual nudge, if any.
    pub fn manual_direction(&self) -> Option<Direction> {
        if self.manual_extend_target != 0.0 {
            Some(Direction::Extending)
        } else if self.manual_retract_target != 0.0 {
            Some(Direction::Retracting)
        } else {
            None
        }
    }

    pub fn has_manual_target(&self) -> bool {
        self.manual_direction().is_some()
    }

    pub fn effective_target(&self) -> f64 {
        match self.manual_direction() {
            Some(Direction::Extending) => self.manual_extend_target,
            Some(Direction::Retracting) => self.manual_retract_target,
            _ => self.target_length,
        }
    }

    /// Direction of the next run: a manual nudge wins over the target.
    pub fn run_direction(&self) -> Direction {
        if let Some(direction) = self.manual_direction() {
            return direction;
        }
        if self.actual_length < self.target_length {
            Direction::Extending
        } else if self.actual_length > self.target_length {
            Direction::Retracting
        } else {
            Direction::Idle
        }
    }

    pub fn on_target(&self, direction: Direction) -> bool {
        let target = self.effective_target();
        match direction {
            Direction::Idle => round1(self.actual_length - target).abs() < self.threshold,
            Direction::Extending => self.actual_length >= target,
            Direction::Retracting => self.actual_length <= target,
        }
    }

    pub fn advance(&mut self, direction: Direction, elapsed_seconds: f64) {
        match direction {
            Direction::Retracting => self.actual_length -= self.up_speed_per_second() * elapsed_seconds,
            Direction::Extending => self.actual_length += self.down_speed_per_second() * elapsed_seconds,
            Direction::Idle => {}
        }
    }

    pub fn clamp(&mut self) {
        self.actual_length = self.actual_length.clamp(0.0, self.chain_length);
    }

    pub fn clear_manual(&mut self) {
        self.manual_extend_target = 0.0;
        self.manual_retract_target = 0.0;
    }

    /// Chain to deploy for a given depth. One boat length of scope, two
    /// with `use_safety`, never eating into `min_remain` at the bitter end.
    pub fn deploy_length(&self, depth: f64, use_safety: bool, min_remain: f64) -> f64 {
        let safety_factor = if use_safety { 2.0 } else { 1.0 };
        let length = self.boat_length * safety_factor + depth * 2.0;
        length.min(self.chain_length - min_remain).round()
    }

    /// Retrieved to (almost) the minimum length.
    pub fn anchor_is_almost_up(&self) -> bool {
        self.target_length == self.min_length_up && self.actual_length < self.target_length * 1.5
    }
}
