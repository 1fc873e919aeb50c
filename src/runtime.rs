// Drive loop: commands in, supervisor ticks, status out
// Note: the supervisor owns the motors and lives on this one task. Commands
// reach it through a channel fed by the zenoh callback, so neither the
// transport nor the timer ever touches the actuator directly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// local imports
use crate::config::{Args, CMD_QUEUE_DEPTH, TOPIC_HEALTH, TOPIC_RT_MOTORS, TurnAxis};
use crate::messages::{Status, Twist, VelocityCommand};
use crate::motor::sim::SimActuator;
use crate::motor::Actuator;
use crate::supervisor::{Supervisor, SupervisorError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded command together with its arrival time
#[derive(Debug, Clone, Copy)]
pub struct StampedCommand {
    pub cmd: VelocityCommand,
    pub received_at: Instant,
}

impl StampedCommand {
    pub fn now(cmd: VelocityCommand) -> Self {
        Self {
            cmd,
            received_at: Instant::now(),
        }
    }
}

/// Decode one inbound payload into a command
pub fn decode_command(payload: &[u8], axis: TurnAxis) -> Result<VelocityCommand, serde_json::Error> {
    let twist: Twist = serde_json::from_slice(payload)?;
    Ok(VelocityCommand::from_twist(&twist, axis))
}

/// Run the supervisor against a command stream until the stream closes
///
/// Ticks take priority over commands when both are ready, so an expired
/// deadline is always enforced before a late command can be applied.
/// A status snapshot is sent after every tick.
pub async fn drive_loop<A: Actuator>(
    supervisor: &mut Supervisor<A>,
    commands: &mut mpsc::Receiver<StampedCommand>,
    status: &watch::Sender<Status>,
    period: Duration,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = tick.tick() => {
                if let Err(e) = supervisor.tick(Instant::now()) {
                    error!("Failsafe tick failed: {}", e);
                }
                status.send_replace(Status {
                    speeds: supervisor.last_applied(),
                    health: supervisor.health(),
                });
            }

            received = commands.recv() => {
                let Some(StampedCommand { cmd, received_at }) = received else {
                    info!("Command stream closed");
                    break;
                };
                debug!("Received command: {:?}", cmd);
                match supervisor.on_command(cmd, received_at, Instant::now()) {
                    Ok(outcome) => debug!("Command outcome: {:?}", outcome),
                    Err(e @ SupervisorError::ActuatorWriteFailure(_)) => {
                        warn!("Command dropped: {}", e);
                    }
                    Err(e) => {
                        error!("Supervisor rejected command: {}", e);
                    }
                }
            }
        }
    }
}

/// Forward every status snapshot to `publish` until the sender goes away
///
/// A failed publish is logged and the next snapshot is still sent.
pub async fn publish_status<F, Fut>(mut status_rx: watch::Receiver<Status>, mut publish: F)
where
    F: FnMut(Status) -> Fut,
    Fut: Future<Output = Result<(), BoxError>>,
{
    while status_rx.changed().await.is_ok() {
        let status = *status_rx.borrow_and_update();
        if let Err(e) = publish(status).await {
            warn!("Failed to publish status: {}", e);
        }
    }
}

fn build_actuator(args: &Args) -> Result<Box<dyn Actuator>, BoxError> {
    if args.simulate {
        info!("Using simulated motor board");
        return Ok(Box::new(SimActuator::with_failsafe_window(
            args.failsafe_timeout(),
        )));
    }
    open_hardware(args)
}

#[cfg(target_os = "linux")]
fn open_hardware(args: &Args) -> Result<Box<dyn Actuator>, BoxError> {
    let board = crate::motor::picoborg::PicoBorgRev::open(&args.i2c_bus, args.i2c_address)?;
    Ok(Box::new(board))
}

#[cfg(not(target_os = "linux"))]
fn open_hardware(_args: &Args) -> Result<Box<dyn Actuator>, BoxError> {
    Err("PicoBorg Reverse needs Linux I2C; run with --simulate".into())
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    let actuator = build_actuator(&args)?;
    let mut supervisor = Supervisor::new(actuator, args.failsafe_timeout());
    // No commands are accepted until the board is verified and armed
    supervisor.init(Instant::now())?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<StampedCommand>(CMD_QUEUE_DEPTH);
    let axis = args.turn_axis;
    let _subscriber = session
        .declare_subscriber(args.cmd_topic.as_str())
        .callback(move |sample| {
            let payload = sample.payload().to_bytes();
            match decode_command(&payload, axis) {
                Ok(cmd) => {
                    if let Err(e) = cmd_tx.try_send(StampedCommand::now(cmd)) {
                        warn!("Dropping command, drive loop not keeping up: {}", e);
                    }
                }
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        })
        .await?;
    let pub_motors = session.declare_publisher(TOPIC_RT_MOTORS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let publishers = Arc::new((pub_motors, pub_health));

    let (status_tx, status_rx) = watch::channel(Status::default());
    let publisher = tokio::spawn(publish_status(status_rx, move |status| {
        let publishers = Arc::clone(&publishers);
        async move {
            let (pub_motors, pub_health) = &*publishers;
            pub_motors.put(serde_json::to_string(&status.speeds)?).await?;
            pub_health.put(serde_json::to_string(&status.health)?).await?;
            Ok::<(), BoxError>(())
        }
    }));

    info!(
        "Runtime started: {}Hz loop, {}ms failsafe timeout, turn axis {:?}",
        args.loop_hz,
        args.failsafe_ms,
        args.turn_axis
    );
    info!("Subscribed to: {}", args.cmd_topic);
    info!("Publishing to: {}, {}", TOPIC_RT_MOTORS, TOPIC_HEALTH);

    tokio::select! {
        _ = drive_loop(&mut supervisor, &mut cmd_rx, &status_tx, args.tick_period()) => {}
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
    }

    // Motors must be stopped before anything else is torn down
    let stopped = supervisor.shutdown();
    drop(status_tx);
    if let Err(e) = publisher.await {
        warn!("Status publisher panicked: {}", e);
    }
    stopped?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MotorSpeeds, RuntimeHealth};
    use crate::supervisor::SupervisorState;

    const TIMEOUT: Duration = Duration::from_millis(250);
    const PERIOD: Duration = Duration::from_millis(20);

    fn armed() -> Supervisor<SimActuator> {
        let mut sup = Supervisor::new(SimActuator::with_failsafe_window(TIMEOUT), TIMEOUT);
        sup.init(Instant::now()).unwrap();
        sup
    }

    #[tokio::test(start_paused = true)]
    async fn publish_error_does_not_end_status_stream() {
        let (status_tx, status_rx) = watch::channel(Status::default());
        let published = Arc::new(std::sync::Mutex::new(Vec::new()));
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let sink = {
            let published = Arc::clone(&published);
            let attempts = Arc::clone(&attempts);
            move |status: Status| {
                let first = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0;
                let published = Arc::clone(&published);
                async move {
                    if first {
                        return Err::<(), BoxError>("zenoh put failed".into());
                    }
                    published.lock().unwrap().push(status);
                    Ok(())
                }
            }
        };

        let feeder = async {
            status_tx.send_replace(Status {
                speeds: MotorSpeeds::new(0.5, 0.5),
                health: RuntimeHealth::Ok,
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            status_tx.send_replace(Status {
                speeds: MotorSpeeds::zero(),
                health: RuntimeHealth::CmdStale,
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(status_tx);
        };

        tokio::join!(publish_status(status_rx, sink), feeder);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(
            *published.lock().unwrap(),
            vec![Status {
                speeds: MotorSpeeds::zero(),
                health: RuntimeHealth::CmdStale,
            }]
        );
    }

    #[test]
    fn decodes_twist_payload() {
        let cmd = decode_command(br#"{"linear":{"x":1.0},"angular":{"z":0.5}}"#, TurnAxis::Z)
            .unwrap();
        assert_eq!(cmd, VelocityCommand::new(1.0, 0.5));
        assert!(decode_command(b"not json", TurnAxis::Z).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn applies_commands_then_stops_after_timeout() {
        let mut sup = armed();
        let (tx, mut rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(Status::default());

        let feeder = async {
            tx.send(StampedCommand::now(VelocityCommand::new(1.0, 0.5)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(status_rx.borrow().health, RuntimeHealth::Ok);
            assert_eq!(status_rx.borrow().speeds, MotorSpeeds::new(1.5, 0.5));

            tokio::time::sleep(Duration::from_millis(300)).await;
            let status = *status_rx.borrow();
            assert_eq!(status.health, RuntimeHealth::CmdStale);
            assert!(status.speeds.is_zero());
            drop(tx);
        };

        tokio::join!(drive_loop(&mut sup, &mut rx, &status_tx, PERIOD), feeder);
        assert_eq!(sup.state(), SupervisorState::StoppedStale);
        assert!(sup.actuator().speeds().is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_moving_while_commands_arrive() {
        let mut sup = armed();
        let (tx, mut rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(Status::default());

        let feeder = async {
            for _ in 0..10 {
                tx.send(StampedCommand::now(VelocityCommand::new(0.5, 0.0)))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(status_rx.borrow().health, RuntimeHealth::Ok);
            }
            drop(tx);
        };

        tokio::join!(drive_loop(&mut sup, &mut rx, &status_tx, PERIOD), feeder);
        assert_eq!(sup.actuator().speeds(), MotorSpeeds::new(0.5, 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn later_command_wins() {
        let mut sup = armed();
        let (tx, mut rx) = mpsc::channel(8);
        let (status_tx, _status_rx) = watch::channel(Status::default());

        tx.send(StampedCommand::now(VelocityCommand::new(1.0, 0.0)))
            .await
            .unwrap();
        tx.send(StampedCommand::now(VelocityCommand::new(0.0, 0.25)))
            .await
            .unwrap();
        drop(tx);

        drive_loop(&mut sup, &mut rx, &status_tx, PERIOD).await;
        assert_eq!(sup.last_applied(), MotorSpeeds::new(0.25, -0.25));
        assert_eq!(sup.actuator().speeds(), MotorSpeeds::new(0.25, -0.25));
    }

    #[tokio::test(start_paused = true)]
    async fn late_command_is_not_applied() {
        let mut sup = armed();
        let (tx, mut rx) = mpsc::channel(8);
        let (status_tx, _status_rx) = watch::channel(Status::default());

        // Stamped, then held past the deadline before the loop sees it
        let stale = StampedCommand::now(VelocityCommand::new(1.0, 0.0));
        tokio::time::advance(Duration::from_millis(300)).await;
        tx.send(stale).await.unwrap();
        drop(tx);

        drive_loop(&mut sup, &mut rx, &status_tx, PERIOD).await;
        assert_eq!(sup.actuator().motor_writes(), 0);
        assert!(sup.actuator().speeds().is_zero());
        assert_eq!(sup.state(), SupervisorState::StoppedStale);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_does_not_stop_loop() {
        let mut sup = armed();
        sup.actuator_mut()
            .set_fail_channel(Some(crate::motor::Channel::Motor1));
        let (tx, mut rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(Status::default());

        let feeder = async {
            tx.send(StampedCommand::now(VelocityCommand::new(0.5, 0.0)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(status_rx.borrow().health, RuntimeHealth::CmdStale);
            drop(tx);
        };

        tokio::join!(drive_loop(&mut sup, &mut rx, &status_tx, PERIOD), feeder);
        assert!(sup.actuator().speeds().is_zero());
    }
}
