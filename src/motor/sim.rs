// In-process motor board for running the runtime without hardware
//
// Records every write and emulates the board-side comms watchdog: once the
// failsafe is enabled, `observed_speeds` reads zero on both channels if no
// `set_motor` arrived within the window. Faults can be injected per call.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::actuator::{Actuator, ActuatorError, Channel};
use crate::config::FAILSAFE_TIMEOUT;
use crate::messages::MotorSpeeds;

/// A single recorded actuator call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    Init,
    ResetEmergencyStop,
    SetFailsafe(bool),
    SetMotor(Channel, f32),
    Stop,
}

/// Simulated two-channel motor board
#[derive(Debug)]
pub struct SimActuator {
    speeds: MotorSpeeds,
    failsafe: bool,
    failsafe_window: Duration,
    last_write: Option<Instant>,
    initialized: bool,
    fail_init: bool,
    fail_channel: Option<Channel>,
    fail_stop: bool,
    fail_failsafe: bool,
    history: Vec<SimEvent>,
}

impl Default for SimActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimActuator {
    /// Create a simulated board with the default failsafe window
    pub fn new() -> Self {
        Self::with_failsafe_window(FAILSAFE_TIMEOUT)
    }

    pub fn with_failsafe_window(failsafe_window: Duration) -> Self {
        Self {
            speeds: MotorSpeeds::zero(),
            failsafe: false,
            failsafe_window,
            last_write: None,
            initialized: false,
            fail_init: false,
            fail_channel: None,
            fail_stop: false,
            fail_failsafe: false,
            history: Vec::new(),
        }
    }

    /// Make `init` fail
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make writes to `channel` fail (None clears it)
    pub fn set_fail_channel(&mut self, channel: Option<Channel>) {
        self.fail_channel = channel;
    }

    /// Make `stop` fail
    pub fn set_fail_stop(&mut self, fail: bool) {
        self.fail_stop = fail;
    }

    /// Make `set_failsafe` fail
    pub fn set_fail_failsafe(&mut self, fail: bool) {
        self.fail_failsafe = fail;
    }

    /// Last values written, ignoring the watchdog
    pub fn speeds(&self) -> MotorSpeeds {
        self.speeds
    }

    /// What the wheels would actually be doing at `now`
    pub fn observed_speeds(&self, now: Instant) -> MotorSpeeds {
        if !self.failsafe {
            return self.speeds;
        }
        match self.last_write {
            Some(at) if now.saturating_duration_since(at) <= self.failsafe_window => self.speeds,
            _ => MotorSpeeds::zero(),
        }
    }

    pub fn failsafe_enabled(&self) -> bool {
        self.failsafe
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn history(&self) -> &[SimEvent] {
        &self.history
    }

    /// Number of `set_motor` calls recorded so far
    pub fn motor_writes(&self) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(e, SimEvent::SetMotor(..)))
            .count()
    }
}

impl Actuator for SimActuator {
    fn init(&mut self) -> Result<(), ActuatorError> {
        self.history.push(SimEvent::Init);
        if self.fail_init {
            return Err(ActuatorError::Bus("simulated board not responding".to_string()));
        }
        self.initialized = true;
        self.speeds = MotorSpeeds::zero();
        Ok(())
    }

    fn reset_emergency_stop(&mut self) -> Result<(), ActuatorError> {
        self.history.push(SimEvent::ResetEmergencyStop);
        Ok(())
    }

    fn set_failsafe(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.history.push(SimEvent::SetFailsafe(enabled));
        if self.fail_failsafe {
            return Err(ActuatorError::VerifyFailed {
                setting: "failsafe",
                expected: enabled,
                actual: self.failsafe,
            });
        }
        self.failsafe = enabled;
        Ok(())
    }

    fn set_motor(&mut self, channel: Channel, speed: f32) -> Result<(), ActuatorError> {
        self.history.push(SimEvent::SetMotor(channel, speed));
        if self.fail_channel == Some(channel) {
            return Err(ActuatorError::Write {
                channel,
                reason: "simulated write failure".to_string(),
            });
        }

        let speed = speed.clamp(-1.0, 1.0);
        debug!("Sim {} -> {}", channel, speed);
        match channel {
            Channel::Motor1 => self.speeds.left = speed,
            Channel::Motor2 => self.speeds.right = speed,
        }
        self.last_write = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.history.push(SimEvent::Stop);
        if self.fail_stop {
            return Err(ActuatorError::Bus("simulated stop failure".to_string()));
        }
        self.speeds = MotorSpeeds::zero();
        Ok(())
    }

    fn has_builtin_failsafe(&self) -> bool {
        true
    }
}
