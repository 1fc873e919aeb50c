// PicoBorg Reverse dual motor board over I2C (SMBus)
//
// Every command is a single SMBus byte write: [command, value].
// Reads return a word whose high byte carries the value.

use std::path::Path;

use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
use tracing::{debug, info, warn};

use super::actuator::{Actuator, ActuatorError, Channel};

/// Board identifier returned by `Command::GetId`
pub const BOARD_ID: u8 = 0x15;

/// Full-scale PWM value
const PWM_MAX: u8 = 255;

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetLed = 1,
    SetAFwd = 3, // motor 2 forward
    SetARev = 4, // motor 2 reverse
    SetBFwd = 6, // motor 1 forward
    SetBRev = 7, // motor 1 reverse
    AllOff = 9,
    ResetEpo = 10,
    GetEpo = 11,
    SetFailsafe = 17,
    GetFailsafe = 18,
    GetId = 0x99,
}

const VALUE_ON: u8 = 1;
const VALUE_OFF: u8 = 0;

impl From<LinuxI2CError> for ActuatorError {
    fn from(e: LinuxI2CError) -> Self {
        ActuatorError::Bus(e.to_string())
    }
}

/// PicoBorg Reverse handle
pub struct PicoBorgRev {
    device: LinuxI2CDevice,
    address: u16,
}

impl PicoBorgRev {
    /// Open the board on the given I2C bus
    pub fn open(bus: impl AsRef<Path>, address: u16) -> Result<Self, ActuatorError> {
        info!("Opening PicoBorg Reverse on {} at 0x{:02X}", bus.as_ref().display(), address);
        let device = LinuxI2CDevice::new(bus, address)?;
        Ok(Self { device, address })
    }

    fn write(&mut self, command: Command, value: u8) -> Result<(), ActuatorError> {
        self.device.smbus_write_byte_data(command as u8, value)?;
        Ok(())
    }

    fn read_value(&mut self, command: Command) -> Result<u8, ActuatorError> {
        let data = self.device.smbus_read_word_data(command as u8)?;
        Ok((data >> 8) as u8)
    }

    /// Read the board identifier
    pub fn board_id(&mut self) -> Result<u8, ActuatorError> {
        self.read_value(Command::GetId)
    }

    /// True if the EPO has tripped and movement is blocked
    pub fn emergency_stop_latched(&mut self) -> Result<bool, ActuatorError> {
        Ok(self.read_value(Command::GetEpo)? == VALUE_ON)
    }

    pub fn failsafe_enabled(&mut self) -> Result<bool, ActuatorError> {
        Ok(self.read_value(Command::GetFailsafe)? == VALUE_ON)
    }

    pub fn led_on(&mut self) -> Result<(), ActuatorError> {
        let (command, value) = encode_led(true);
        self.write(command, value)
    }

    pub fn led_off(&mut self) -> Result<(), ActuatorError> {
        let (command, value) = encode_led(false);
        self.write(command, value)
    }
}

fn encode_led(on: bool) -> (Command, u8) {
    (Command::SetLed, if on { VALUE_ON } else { VALUE_OFF })
}

/// Turn a drive level into the direction command and PWM byte for a channel
fn encode_power(channel: Channel, power: f32) -> (Command, u8) {
    let reverse = power < 0.0;
    let command = match (channel, reverse) {
        (Channel::Motor1, false) => Command::SetBFwd,
        (Channel::Motor1, true) => Command::SetBRev,
        (Channel::Motor2, false) => Command::SetAFwd,
        (Channel::Motor2, true) => Command::SetARev,
    };
    // NaN clamps to 0 through the float-to-int cast
    let pwm = (PWM_MAX as f32 * power.abs()).clamp(0.0, PWM_MAX as f32) as u8;
    (command, pwm)
}

impl Actuator for PicoBorgRev {
    fn init(&mut self) -> Result<(), ActuatorError> {
        let id = self.board_id()?;
        if id != BOARD_ID {
            return Err(ActuatorError::UnexpectedDevice {
                address: self.address,
                id,
            });
        }
        info!("Found PicoBorg Reverse at 0x{:02X}", self.address);
        self.stop()?;
        // LED lit while the runtime holds the board
        self.led_on()
    }

    fn reset_emergency_stop(&mut self) -> Result<(), ActuatorError> {
        self.write(Command::ResetEpo, 0)?;
        if self.emergency_stop_latched()? {
            return Err(ActuatorError::EmergencyStopLatched);
        }
        Ok(())
    }

    fn set_failsafe(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.write(Command::SetFailsafe, if enabled { VALUE_ON } else { VALUE_OFF })?;
        let actual = self.failsafe_enabled()?;
        if actual != enabled {
            return Err(ActuatorError::VerifyFailed {
                setting: "failsafe",
                expected: enabled,
                actual,
            });
        }
        Ok(())
    }

    fn set_motor(&mut self, channel: Channel, speed: f32) -> Result<(), ActuatorError> {
        let (command, pwm) = encode_power(channel, speed);
        debug!("Setting {} power: {} pwm: {}", channel, speed, pwm);
        self.write(command, pwm).map_err(|e| ActuatorError::Write {
            channel,
            reason: e.to_string(),
        })
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.write(Command::AllOff, 0)
    }

    fn has_builtin_failsafe(&self) -> bool {
        true
    }
}

impl Drop for PicoBorgRev {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
        if let Err(e) = self.led_off() {
            debug!("Failed to switch LED off on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_forward_and_reverse() {
        assert_eq!(encode_power(Channel::Motor1, 1.0), (Command::SetBFwd, 255));
        assert_eq!(encode_power(Channel::Motor1, -0.5), (Command::SetBRev, 127));
        assert_eq!(encode_power(Channel::Motor2, 0.5), (Command::SetAFwd, 127));
        assert_eq!(encode_power(Channel::Motor2, -1.0), (Command::SetARev, 255));
    }

    #[test]
    fn test_encode_saturates() {
        assert_eq!(encode_power(Channel::Motor1, 1.5), (Command::SetBFwd, 255));
        assert_eq!(encode_power(Channel::Motor2, -40.0), (Command::SetARev, 255));
    }

    #[test]
    fn test_encode_led() {
        assert_eq!(encode_led(true), (Command::SetLed, 1));
        assert_eq!(encode_led(false), (Command::SetLed, 0));
        assert_eq!(Command::SetLed as u8, 1);
    }

    #[test]
    fn test_encode_zero_and_nan() {
        assert_eq!(encode_power(Channel::Motor1, 0.0), (Command::SetBFwd, 0));
        assert_eq!(encode_power(Channel::Motor2, f32::NAN).1, 0);
    }
}
