// Safety supervisor: the only thing allowed to move the motors
//
// Every motor write goes through `on_command`, which refuses to run before
// `init` and drops commands that are already stale. `tick` stops the motors
// once no command has been applied within the failsafe window, independently
// of whether the board's own watchdog does the same.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::messages::{MotorSpeeds, RuntimeHealth, VelocityCommand};
use crate::motor::kinematics;
use crate::motor::{Actuator, ActuatorError, Channel};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Actuator initialization failed: {0}")]
    InitializationFailure(#[source] ActuatorError),

    #[error("Supervisor used before init(); refusing to drive motors")]
    NotInitialized,

    #[error("Actuator write failed: {0}")]
    ActuatorWriteFailure(#[source] ActuatorError),
}

impl SupervisorError {
    /// True for errors that mean the actuator state was never verified
    pub fn is_initialization_failure(&self) -> bool {
        matches!(
            self,
            SupervisorError::InitializationFailure(_) | SupervisorError::NotInitialized
        )
    }
}

/// Supervisor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Actuator not initialized, motion commands are rejected
    Disarmed,
    /// Armed, last command is within the failsafe window
    MovingRecent,
    /// Armed, motors forced to zero until the next valid command
    StoppedStale,
}

/// Comms failsafe bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FailsafeState {
    pub armed: bool,
    pub last_command_time: Option<Instant>,
}

/// Result of handing a command to the supervisor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOutcome {
    /// Both channels were written
    Applied(MotorSpeeds),
    /// The command expired before it could be applied; motors are stopped
    DroppedStale,
}

pub struct Supervisor<A: Actuator> {
    actuator: A,
    timeout: Duration,
    failsafe: FailsafeState,
    state: SupervisorState,
    last_applied: MotorSpeeds,
    faulted: bool,
}

impl<A: Actuator> Supervisor<A> {
    pub fn new(actuator: A, timeout: Duration) -> Self {
        Self {
            actuator,
            timeout,
            failsafe: FailsafeState::default(),
            state: SupervisorState::Disarmed,
            last_applied: MotorSpeeds::zero(),
            faulted: false,
        }
    }

    /// Reset the board to a known-stopped state and arm the comms failsafe
    ///
    /// Must succeed before any command is accepted.
    pub fn init(&mut self, now: Instant) -> Result<(), SupervisorError> {
        info!("Initializing actuator");
        self.prepare_actuator()
            .map_err(SupervisorError::InitializationFailure)?;

        if !self.actuator.has_builtin_failsafe() {
            info!("Actuator has no built-in failsafe, relying on supervisor tick only");
        }

        self.failsafe = FailsafeState {
            armed: true,
            last_command_time: None,
        };
        self.last_applied = MotorSpeeds::zero();
        self.faulted = false;
        self.state = SupervisorState::StoppedStale;
        info!(
            "Failsafe armed at {:?} ({}ms timeout)",
            now,
            self.timeout.as_millis()
        );
        Ok(())
    }

    /// Map a command and drive both motors with it
    ///
    /// `received_at` is when the command arrived; if it is already older
    /// than the timeout at `now` the command is dropped and the motors are
    /// stopped instead.
    pub fn on_command(
        &mut self,
        cmd: VelocityCommand,
        received_at: Instant,
        now: Instant,
    ) -> Result<CommandOutcome, SupervisorError> {
        if !self.failsafe.armed {
            return Err(SupervisorError::NotInitialized);
        }

        let age = now.saturating_duration_since(received_at);
        if age > self.timeout {
            warn!("Dropping command {:?}, {:?} old", cmd, age);
            self.tick(now)?;
            return Ok(CommandOutcome::DroppedStale);
        }

        let speeds = kinematics::map(&cmd);
        debug!("Command {:?} -> {:?}", cmd, speeds);
        self.apply(speeds)?;

        self.failsafe.last_command_time = Some(received_at);
        if self.state != SupervisorState::MovingRecent {
            info!("Commands resumed, motors live");
        }
        self.state = SupervisorState::MovingRecent;
        Ok(CommandOutcome::Applied(speeds))
    }

    /// Enforce the failsafe timeout
    ///
    /// Stops the motors once the last applied command is older than the
    /// timeout, or if no command was ever applied. A previous failed stop is
    /// retried on every tick until it goes through, stale or not. Returns
    /// the state after the check.
    pub fn tick(&mut self, now: Instant) -> Result<SupervisorState, SupervisorError> {
        if !self.failsafe.armed {
            return Ok(self.state);
        }

        let stale = match self.failsafe.last_command_time {
            Some(at) => now.saturating_duration_since(at) > self.timeout,
            None => true,
        };
        if !stale && !self.faulted {
            return Ok(self.state);
        }

        // Stopped already and the board agreed: nothing to resend
        if self.state == SupervisorState::StoppedStale && !self.faulted {
            return Ok(self.state);
        }

        if self.faulted {
            warn!("Retrying stop after actuator fault");
        } else if self.state == SupervisorState::MovingRecent {
            if let Some(at) = self.failsafe.last_command_time {
                warn!(
                    "Command stale ({:?} old), stopping motors",
                    now.saturating_duration_since(at)
                );
            }
        }

        match self.actuator.stop() {
            Ok(()) => {
                self.last_applied = MotorSpeeds::zero();
                self.faulted = false;
                self.state = SupervisorState::StoppedStale;
                Ok(self.state)
            }
            Err(e) => {
                error!("Failed to stop motors on timeout: {}", e);
                self.faulted = true;
                self.state = SupervisorState::StoppedStale;
                Err(SupervisorError::ActuatorWriteFailure(e))
            }
        }
    }

    /// Stop the motors and disarm before the process exits
    pub fn shutdown(&mut self) -> Result<(), SupervisorError> {
        info!("Shutting down, stopping motors");
        let stopped = self.actuator.stop();
        if self.failsafe.armed {
            if let Err(e) = self.actuator.set_failsafe(false) {
                warn!("Failed to disarm failsafe: {}", e);
            }
        }
        self.failsafe = FailsafeState::default();
        self.state = SupervisorState::Disarmed;
        self.last_applied = MotorSpeeds::zero();
        stopped.map_err(SupervisorError::ActuatorWriteFailure)
    }

    fn prepare_actuator(&mut self) -> Result<(), ActuatorError> {
        self.actuator.init()?;
        self.actuator.reset_emergency_stop()?;
        self.actuator.stop()?;
        self.actuator.set_failsafe(true)
    }

    /// Write both channels as one update
    ///
    /// If the second write fails after the first succeeded, the motors are
    /// stopped so the two sides never disagree.
    fn apply(&mut self, speeds: MotorSpeeds) -> Result<(), SupervisorError> {
        if let Err(e) = self.actuator.set_motor(Channel::Motor1, speeds.left) {
            warn!("Write to {} failed, command dropped: {}", Channel::Motor1, e);
            return Err(SupervisorError::ActuatorWriteFailure(e));
        }

        if let Err(e) = self.actuator.set_motor(Channel::Motor2, speeds.right) {
            warn!(
                "Write to {} failed after {} was updated, stopping: {}",
                Channel::Motor2,
                Channel::Motor1,
                e
            );
            match self.actuator.stop() {
                Ok(()) => {
                    self.last_applied = MotorSpeeds::zero();
                    self.state = SupervisorState::StoppedStale;
                }
                Err(stop_err) => {
                    error!("Failed to stop motors after partial write: {}", stop_err);
                    self.faulted = true;
                    self.state = SupervisorState::StoppedStale;
                }
            }
            return Err(SupervisorError::ActuatorWriteFailure(e));
        }

        self.last_applied = speeds;
        self.faulted = false;
        Ok(())
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn failsafe(&self) -> FailsafeState {
        self.failsafe
    }

    pub fn health(&self) -> RuntimeHealth {
        if self.faulted {
            return RuntimeHealth::ActuatorFault;
        }
        match self.state {
            SupervisorState::Disarmed => RuntimeHealth::Disarmed,
            SupervisorState::MovingRecent => RuntimeHealth::Ok,
            SupervisorState::StoppedStale => RuntimeHealth::CmdStale,
        }
    }

    /// Speeds most recently confirmed on both channels
    pub fn last_applied(&self) -> MotorSpeeds {
        self.last_applied
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }
}
