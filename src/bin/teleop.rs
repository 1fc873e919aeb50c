// Keyboard teleop for the differential-drive runtime
// W/S drive, A/D turn, R/F change speed level, Q quits. Velocities fall back
// to zero shortly after the last drive key so a released key stops the robot.
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::info;

use diffdrive_zenoh_runtime::config::TOPIC_CMD_VEL;
use diffdrive_zenoh_runtime::messages::{Twist, Vector3};

// (label, drive, turn) in normalized units
const LEVELS: [(&str, f32, f32); 3] = [("LOW", 0.2, 0.2), ("MED", 0.5, 0.4), ("HIGH", 1.0, 0.8)];
const HOLD: Duration = Duration::from_millis(100);
const PUBLISH_PERIOD: Duration = Duration::from_millis(20);

/// Keyboard teleop publishing twist commands over zenoh
#[derive(Debug, Parser)]
#[command(version, about)]
struct TeleopArgs {
    /// Zenoh key expression to publish velocity commands on
    #[arg(long, default_value = TOPIC_CMD_VEL)]
    cmd_topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Key {
    Drive(f32),
    Turn(f32),
    Faster,
    Slower,
    Quit,
}

fn decode_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::Char('w') => Some(Key::Drive(1.0)),
        KeyCode::Char('s') => Some(Key::Drive(-1.0)),
        KeyCode::Char('a') => Some(Key::Turn(1.0)),
        KeyCode::Char('d') => Some(Key::Turn(-1.0)),
        KeyCode::Char('r') => Some(Key::Faster),
        KeyCode::Char('f') => Some(Key::Slower),
        KeyCode::Char('q') | KeyCode::Esc => Some(Key::Quit),
        _ => None,
    }
}

/// Held drive intent, expiring `HOLD` after the last drive key
#[derive(Debug, Default)]
struct DriveState {
    level: usize,
    linear: f32,
    turn: f32,
    held_until: Option<Instant>,
}

impl DriveState {
    /// Apply a key; returns false when the user asked to quit
    fn press(&mut self, key: Key, now: Instant) -> bool {
        let (label, drive, turn) = LEVELS[self.level];
        match key {
            Key::Drive(dir) => {
                self.linear = dir * drive;
                self.held_until = Some(now + HOLD);
            }
            Key::Turn(dir) => {
                self.turn = dir * turn;
                self.held_until = Some(now + HOLD);
            }
            Key::Faster | Key::Slower => {
                self.level = match key {
                    Key::Faster => (self.level + 1).min(LEVELS.len() - 1),
                    _ => self.level.saturating_sub(1),
                };
                if LEVELS[self.level].0 != label {
                    info!("Speed: {}", LEVELS[self.level].0);
                }
            }
            Key::Quit => return false,
        }
        true
    }

    fn twist(&mut self, now: Instant) -> Twist {
        if self.held_until.is_some_and(|t| now > t) {
            self.linear = 0.0;
            self.turn = 0.0;
            self.held_until = None;
        }
        Twist {
            linear: Vector3 {
                x: self.linear,
                ..Default::default()
            },
            angular: Vector3 {
                z: self.turn,
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = TeleopArgs::parse();
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(args.cmd_topic.clone()).await?;

    info!("Publishing to: {}", args.cmd_topic);
    info!("Controls: W/S=drive, A/D=turn, R/F=speed, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut state = DriveState::default();

    loop {
        // Waiting on the keyboard also paces publishing
        if event::poll(PUBLISH_PERIOD)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = matches!(kind, KeyEventKind::Press | KeyEventKind::Repeat);
                if let Some(key) = decode_key(code).filter(|_| pressed) {
                    if !state.press(key, Instant::now()) {
                        break;
                    }
                }
            }
        }

        // Publish even when idle so the runtime's failsafe sees a live stream
        let twist = state.twist(Instant::now());
        publisher.put(serde_json::to_string(&twist)?).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_and_turn_combine() {
        let mut state = DriveState::default();
        let now = Instant::now();
        assert!(state.press(Key::Drive(1.0), now));
        assert!(state.press(Key::Turn(-1.0), now));
        let twist = state.twist(now);
        assert_eq!(twist.linear.x, 0.2);
        assert_eq!(twist.angular.z, -0.2);
    }

    #[test]
    fn released_keys_stop_after_hold() {
        let mut state = DriveState::default();
        let now = Instant::now();
        state.press(Key::Drive(1.0), now);
        let twist = state.twist(now + HOLD + Duration::from_millis(1));
        assert_eq!(twist, Twist::default());
    }

    #[test]
    fn speed_level_saturates() {
        let mut state = DriveState::default();
        let now = Instant::now();
        for _ in 0..5 {
            state.press(Key::Faster, now);
        }
        state.press(Key::Drive(-1.0), now);
        assert_eq!(state.twist(now).linear.x, -1.0);

        for _ in 0..5 {
            state.press(Key::Slower, now);
        }
        assert_eq!(state.level, 0);
    }

    #[test]
    fn quit_and_unknown_keys() {
        let mut state = DriveState::default();
        assert_eq!(decode_key(KeyCode::Char('x')), None);
        assert_eq!(decode_key(KeyCode::Esc), Some(Key::Quit));
        assert!(!state.press(Key::Quit, Instant::now()));
    }

    #[test]
    fn default_topic() {
        let args = TeleopArgs::parse_from(["teleop"]);
        assert_eq!(args.cmd_topic, TOPIC_CMD_VEL);
    }
}
