// Actuator abstraction the safety supervisor drives
//
// Anything that can spin two motor channels and cut them out on its own
// (a motor board, the simulator) implements `Actuator`.

use std::fmt;

/// Drive channel on a two-motor board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Motor1,
    Motor2,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Motor1 => write!(f, "motor 1"),
            Channel::Motor2 => write!(f, "motor 2"),
        }
    }
}

/// Error types for motor board communication
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("I2C bus error: {0}")]
    Bus(String),

    #[error("Device at 0x{address:02X} is not a motor board (ID 0x{id:02X})")]
    UnexpectedDevice { address: u16, id: u8 },

    #[error("{setting} read back as {actual}, expected {expected}")]
    VerifyFailed {
        setting: &'static str,
        expected: bool,
        actual: bool,
    },

    #[error("Emergency stop is latched")]
    EmergencyStopLatched,

    #[error("Write to {channel} failed: {reason}")]
    Write { channel: Channel, reason: String },
}

/// Two-channel motor actuator with a communications failsafe
///
/// Contract for implementors:
/// * `init` must leave the board in a known state with both motors off.
/// * `set_motor` takes a normalized drive value; clamping to the board's
///   range happens here, not in the caller.
/// * Once `set_failsafe(true)` succeeds, an actuator that reports
///   `has_builtin_failsafe()` must drop both channels to zero on its own if
///   no `set_motor` arrives within its window.
pub trait Actuator: Send {
    /// Bring the board up and verify it is the expected device
    fn init(&mut self) -> Result<(), ActuatorError>;

    /// Clear a tripped emergency-stop latch
    fn reset_emergency_stop(&mut self) -> Result<(), ActuatorError>;

    /// Enable or disable the comms failsafe
    fn set_failsafe(&mut self, enabled: bool) -> Result<(), ActuatorError>;

    /// Set drive level for one channel, -1.0..=1.0
    fn set_motor(&mut self, channel: Channel, speed: f32) -> Result<(), ActuatorError>;

    /// Switch both channels off
    fn stop(&mut self) -> Result<(), ActuatorError>;

    /// Whether the hardware cuts the motors out by itself once armed
    fn has_builtin_failsafe(&self) -> bool {
        false
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn init(&mut self) -> Result<(), ActuatorError> {
        (**self).init()
    }

    fn reset_emergency_stop(&mut self) -> Result<(), ActuatorError> {
        (**self).reset_emergency_stop()
    }

    fn set_failsafe(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        (**self).set_failsafe(enabled)
    }

    fn set_motor(&mut self, channel: Channel, speed: f32) -> Result<(), ActuatorError> {
        (**self).set_motor(channel, speed)
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        (**self).stop()
    }

    fn has_builtin_failsafe(&self) -> bool {
        (**self).has_builtin_failsafe()
    }
}
