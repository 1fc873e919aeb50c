// Differential-drive kinematics for a two-wheel base
// Converts a planar velocity command (forward, turn rate) into left/right drive values.
//
// No clamping or unit conversion happens here: saturating to what the board
// accepts is the actuator's job.

use crate::messages::{MotorSpeeds, VelocityCommand};

/// Map a velocity command onto the two drive channels
///
/// * `left  = linear_x + angular_z`
/// * `right = linear_x - angular_z`
///
/// A positive turn rate speeds up the left side and slows the right side by
/// the same amount, so `angular_z` alone spins in place and `linear_x` alone
/// drives straight.
pub fn map(cmd: &VelocityCommand) -> MotorSpeeds {
    MotorSpeeds {
        left: cmd.linear_x + cmd.angular_z,
        right: cmd.linear_x - cmd.angular_z,
    }
}

impl From<&VelocityCommand> for MotorSpeeds {
    fn from(cmd: &VelocityCommand) -> Self {
        map(cmd)
    }
}
