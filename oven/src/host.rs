use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, Incoming, MqttOptions, QoS};
use tokio::{
    sync::mpsc,
    time::{Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use koven_common::{
    decode_command, encode_event_frame, frame_hex, Command, EmulatorConfig, Event, Oven,
    EVENT_FRAME_LEN, TOPIC_COMMANDS, TOPIC_EVENTS,
};

const COMMAND_QUEUE_DEPTH: usize = 16;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting koven");

    let mut config = load_config().await.unwrap_or_else(|err| {
        warn!("failed to load config: {err:#}");
        EmulatorConfig::default()
    });
    config.apply_env(|key| std::env::var(key).ok());

    let mut mqtt_options =
        MqttOptions::new(&config.mqtt.client_id, &config.mqtt.host, config.mqtt.port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    mqtt_options.set_clean_session(true);
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(&config.mqtt.user, &config.mqtt.pass);
    }

    info!(
        "connecting to mqtt broker at {}:{}",
        config.mqtt.host, config.mqtt.port
    );
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 32);

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    spawn_mqtt_loop(mqtt.clone(), eventloop, command_tx);

    info!("koven is running");
    control_loop(
        Oven::new(),
        &mqtt,
        command_rx,
        Duration::from_millis(config.tick_interval_ms),
    )
    .await;

    info!("shutting down");
    if let Err(err) = mqtt.unsubscribe(TOPIC_COMMANDS).await {
        warn!("unsubscribe failed: {err}");
    }
    mqtt.disconnect()
        .await
        .context("failed to disconnect from mqtt broker")?;
    info!("koven stopped");
    Ok(())
}

async fn load_config() -> anyhow::Result<EmulatorConfig> {
    match std::env::var_os("KOVEN_CONFIG").map(PathBuf::from) {
        Some(path) => load_config_from(&path).await,
        None => Ok(EmulatorConfig::default()),
    }
}

async fn load_config_from(path: &Path) -> anyhow::Result<EmulatorConfig> {
    match tokio::fs::read(&path).await {
        Ok(raw) => EmulatorConfig::from_json(&raw)
            .with_context(|| format!("invalid config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(EmulatorConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn spawn_mqtt_loop(mqtt: AsyncClient, mut eventloop: EventLoop, commands: mpsc::Sender<Command>) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Incoming::Publish(message))) => {
                    if message.topic != TOPIC_COMMANDS {
                        continue;
                    }
                    let Some(command) = parse_command(&message.payload) else {
                        continue;
                    };
                    if commands.send(command).await.is_err() {
                        // Control loop is gone; we are shutting down.
                        break;
                    }
                }
                Ok(MqttEvent::Incoming(Incoming::ConnAck(_))) => {
                    // Clean sessions drop subscriptions on every reconnect.
                    info!("mqtt connected, subscribing to {TOPIC_COMMANDS}");
                    if let Err(err) = mqtt.subscribe(TOPIC_COMMANDS, QoS::AtLeastOnce).await {
                        warn!("failed to subscribe to {TOPIC_COMMANDS}: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Decodes a received payload, logging why it was dropped if it is not a command.
fn parse_command(payload: &[u8]) -> Option<Command> {
    if payload.is_empty() {
        return None;
    }

    debug!(
        "received command frame ({} bytes): {}",
        payload.len(),
        frame_hex(payload)
    );

    match decode_command(payload) {
        Ok(command) => {
            info!(
                "command parsed: action={}, temperature={}°C, duration={}s",
                command.action.as_str(),
                command.temperature,
                command.duration
            );
            Some(command)
        }
        Err(err) => {
            warn!("failed to parse command frame: {err}");
            None
        }
    }
}

async fn control_loop(
    mut oven: Oven,
    mqtt: &AsyncClient,
    mut commands: mpsc::Receiver<Command>,
    tick_interval: Duration,
) {
    let mut interval = tick_timer(tick_interval);
    // The first tick of a tokio interval completes immediately.
    interval.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (event, frame) = tick_and_encode(&mut oven);
                log_event(&event, &frame);
                publish_event(mqtt, &frame);
            }
            Some(command) = commands.recv() => {
                oven.execute(&command);
                debug!("oven now {}", oven.state().as_str());
            }
            _ = &mut shutdown => break,
        }
    }
}

/// Late ticks are pushed back rather than fired in a burst.
fn tick_timer(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Queues an event frame without waiting. A full request queue drops the
/// frame so the tick loop keeps running while the broker is unreachable.
fn publish_event(mqtt: &AsyncClient, frame: &[u8]) -> bool {
    match mqtt.try_publish(TOPIC_EVENTS, QoS::AtLeastOnce, false, frame.to_vec()) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to publish event: {err}");
            false
        }
    }
}

fn tick_and_encode(oven: &mut Oven) -> (Event, [u8; EVENT_FRAME_LEN]) {
    let event = oven.tick();
    (event, encode_event_frame(&event))
}

fn log_event(event: &Event, frame: &[u8]) {
    info!(
        "publishing event: state={}, temp={}°C, remaining={}, programmed_temp={}, programmed_duration={}",
        event.state.as_str(),
        event.current_temperature,
        display_field(event.remaining_time, "s"),
        display_field(event.programmed_temperature, "°C"),
        display_field(event.programmed_duration, "s"),
    );
    debug!("event frame: {}", frame_hex(frame));
}

fn display_field(value: Option<i16>, unit: &str) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v}{unit}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use koven_common::{decode_event, encode_command_frame, OvenState};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn valid_frame_becomes_command() {
        let frame = encode_command_frame(&Command::start(200, 30));
        assert_eq!(parse_command(&frame), Some(Command::start(200, 30)));
    }

    #[test]
    fn empty_or_corrupt_payloads_are_dropped() {
        assert_eq!(parse_command(&[]), None);

        let mut frame = encode_command_frame(&Command::stop());
        frame[9] ^= 0xFF;
        assert_eq!(parse_command(&frame), None);
        assert_eq!(parse_command(&frame[..5]), None);
    }

    #[test]
    fn tick_frame_carries_the_snapshot() {
        let mut oven = Oven::new();
        oven.execute(&Command::start(26, 5));

        let (event, frame) = tick_and_encode(&mut oven);
        assert_eq!(event.state, OvenState::Preheating);
        assert_eq!(event.current_temperature, 26);
        assert_eq!(decode_event(&frame), Ok(event));
    }

    #[tokio::test]
    async fn publishing_never_waits_on_a_stalled_broker() {
        // The event loop is never polled, so nothing drains the request queue.
        let (mqtt, _eventloop) =
            AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 2);
        let frame = encode_event_frame(&Oven::new().snapshot());

        let published: Vec<bool> = (0..5).map(|_| publish_event(&mqtt, &frame)).collect();
        assert!(published[0]);
        assert!(!published[4]);
    }

    #[tokio::test]
    async fn late_ticks_are_delayed_not_bursted() {
        let interval = tick_timer(Duration::from_millis(50));
        assert_eq!(interval.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(interval.period(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn missing_config_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("koven-oven-missing-config.json");
        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config, EmulatorConfig::default());
    }

    #[tokio::test]
    async fn config_file_is_read_from_disk() {
        let path = std::env::temp_dir()
            .join(format!("koven-oven-config-{}.json", std::process::id()));
        let raw = br#"{
            "mqtt": {"host": "broker.local", "port": 1883, "client_id": "oven-1", "keep_alive_secs": 30},
            "tick_interval_ms": 250
        }"#;
        tokio::fs::write(&path, raw).await.unwrap();

        let config = load_config_from(&path).await;
        tokio::fs::remove_file(&path).await.unwrap();

        let config = config.unwrap();
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.tick_interval_ms, 250);
    }

    #[test]
    fn missing_fields_display_as_not_applicable() {
        assert_eq!(display_field(None, "s"), "n/a");
        assert_eq!(display_field(Some(12), "s"), "12s");
    }
}
