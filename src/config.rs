// Timeouts, topics, motor board configuration
use std::time::Duration;

use clap::{Parser, ValueEnum};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for the failsafe (PicoBorg Reverse cuts out after ~1/4 s as well)
pub const FAILSAFE_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_VEL: &str = "diffdrive/cmd_vel"; // commands
pub const TOPIC_RT_MOTORS: &str = "diffdrive/rt/motors"; // applied motor speeds
pub const TOPIC_HEALTH: &str = "diffdrive/state/health"; // health status

// Inbound commands buffered between the zenoh callback and the drive loop
pub const CMD_QUEUE_DEPTH: usize = 32;

// Motor board configuration
pub const I2C_BUS: &str = "/dev/i2c-1";
pub const PICOBORG_I2C_ADDRESS: u16 = 0x44;

/// Which angular component of an inbound twist is used as the turn rate.
///
/// Planar robots normally turn about `z` (yaw). Some existing teleop setups
/// publish the turn rate in `angular.y`, so that can be selected instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TurnAxis {
    #[default]
    Z,
    Y,
}

/// Command line options for the runtime binary
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Differential-drive motor runtime with a comms failsafe")]
pub struct Args {
    /// I2C bus the motor board is attached to
    #[arg(long, default_value = I2C_BUS)]
    pub i2c_bus: String,

    /// I2C address of the PicoBorg Reverse
    #[arg(long, default_value_t = PICOBORG_I2C_ADDRESS, value_parser = parse_address)]
    pub i2c_address: u16,

    /// Stop the motors if no command arrives within this many milliseconds
    #[arg(long, default_value_t = FAILSAFE_TIMEOUT.as_millis() as u64, value_parser = clap::value_parser!(u64).range(1..))]
    pub failsafe_ms: u64,

    /// Supervisor tick / status publish rate
    #[arg(long, default_value_t = LOOP_HZ, value_parser = clap::value_parser!(u64).range(1..=1000))]
    pub loop_hz: u64,

    /// Angular component used as the turn rate
    #[arg(long, value_enum, default_value_t = TurnAxis::Z)]
    pub turn_axis: TurnAxis,

    /// Zenoh key expression to subscribe to for velocity commands
    #[arg(long, default_value = TOPIC_CMD_VEL)]
    pub cmd_topic: String,

    /// Drive an in-process simulated motor board instead of real hardware
    #[arg(long)]
    pub simulate: bool,
}

impl Args {
    pub fn failsafe_timeout(&self) -> Duration {
        Duration::from_millis(self.failsafe_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz)
    }
}

/// Accept addresses as decimal or `0x`-prefixed hex
fn parse_address(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let args = Args::parse_from(["diffdrive"]);
        assert_eq!(args.i2c_bus, I2C_BUS);
        assert_eq!(args.i2c_address, PICOBORG_I2C_ADDRESS);
        assert_eq!(args.failsafe_timeout(), FAILSAFE_TIMEOUT);
        assert_eq!(args.tick_period(), Duration::from_millis(20));
        assert_eq!(args.turn_axis, TurnAxis::Z);
        assert!(!args.simulate);
    }

    #[test]
    fn parses_hex_address_and_turn_axis() {
        let args = Args::parse_from([
            "diffdrive",
            "--i2c-address",
            "0x45",
            "--turn-axis",
            "y",
            "--simulate",
        ]);
        assert_eq!(args.i2c_address, 0x45);
        assert_eq!(args.turn_axis, TurnAxis::Y);
        assert!(args.simulate);
    }

    #[test]
    fn rejects_zero_loop_rate() {
        assert!(Args::try_parse_from(["diffdrive", "--loop-hz", "0"]).is_err());
    }

    #[test]
    fn rejects_zero_failsafe_timeout() {
        assert!(Args::try_parse_from(["diffdrive", "--failsafe-ms", "0"]).is_err());
        let args = Args::parse_from(["diffdrive", "--failsafe-ms", "1"]);
        assert_eq!(args.failsafe_timeout(), Duration::from_millis(1));
    }
}
