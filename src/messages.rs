// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::config::TurnAxis;

/// 3-component vector as found in a ROS-style twist.
/// Missing components decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

/// Planar velocity intent, in normalized units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityCommand {
    pub linear_x: f32,
    pub angular_z: f32,
}

impl VelocityCommand {
    pub fn new(linear_x: f32, angular_z: f32) -> Self {
        Self {
            linear_x,
            angular_z,
        }
    }

    /// Pick the forward and turn-rate components out of a twist
    pub fn from_twist(twist: &Twist, axis: TurnAxis) -> Self {
        let turn = match axis {
            TurnAxis::Z => twist.angular.z,
            TurnAxis::Y => twist.angular.y,
        };
        Self::new(twist.linear.x, turn)
    }
}

// Motor drive values runtime -> motor board
// Default is both channels stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorSpeeds {
    pub left: f32,
    pub right: f32,
}

impl MotorSpeeds {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Disarmed,
    Ok,
    CmdStale,
    ActuatorFault,
}

/// Snapshot published once per tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub speeds: MotorSpeeds,
    pub health: RuntimeHealth,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            speeds: MotorSpeeds::zero(),
            health: RuntimeHealth::Disarmed,
        }
    }
}
