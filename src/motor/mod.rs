// Motor control module for a two-wheel differential-drive base
//
// Provides:
// - Differential-drive kinematics (velocity command -> left/right drive)
// - Actuator trait with an explicit comms failsafe contract
// - PicoBorg Reverse I2C driver and an in-process simulator

mod actuator;
pub mod kinematics;
#[cfg(target_os = "linux")]
pub mod picoborg;
pub mod sim;

pub use actuator::{Actuator, ActuatorError, Channel};
pub use kinematics::map;
#[cfg(target_os = "linux")]
pub use picoborg::PicoBorgRev;
pub use sim::SimActuator;
