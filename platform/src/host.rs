use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Context};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use koven_common::{
    decode_event, encode_command_frame, frame_hex, Command, Event, PlatformConfig,
    TOPIC_COMMANDS, TOPIC_EVENTS,
};

const EVENT_FANOUT_DEPTH: usize = 64;

#[derive(Clone)]
struct AppState {
    mqtt: AsyncClient,
    connected: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Event>>>,
    events: broadcast::Sender<Event>,
    ws_clients: Arc<AtomicUsize>,
}

impl AppState {
    fn new(mqtt: AsyncClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_FANOUT_DEPTH);
        Self {
            mqtt,
            connected: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(Mutex::new(None)),
            events,
            ws_clients: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: bool,
    websocket_clients: usize,
}

/// Start request body. Values arrive as strings, e.g. `{"temperature": "180"}`.
#[derive(Debug, Deserialize)]
struct StartCommandRequest {
    temperature: String,
    duration: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = load_config().await.unwrap_or_else(|err| {
        warn!("failed to load config: {err:#}");
        PlatformConfig::default()
    });
    config.apply_env(|key| std::env::var(key).ok());

    let mut mqtt_options =
        MqttOptions::new(&config.mqtt.client_id, &config.mqtt.host, config.mqtt.port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    mqtt_options.set_clean_session(true);
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(&config.mqtt.user, &config.mqtt.pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let app_state = AppState::new(mqtt);

    spawn_mqtt_loop(app_state.clone(), eventloop);

    let app = router(app_state.clone());

    let listener = TcpListener::bind(config.http_addr.as_str())
        .await
        .with_context(|| format!("failed to bind platform server at {}", config.http_addr))?;

    info!("platform listening on http://{}", config.http_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("disconnecting mqtt client");
    app_state
        .mqtt
        .disconnect()
        .await
        .context("failed to disconnect from mqtt broker")?;
    info!("shutdown complete");
    Ok(())
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/start", post(handle_start))
        .route("/stop", post(handle_stop))
        .route("/api/state", get(handle_get_state))
        .route("/ws/events", get(handle_ws_events))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn load_config() -> anyhow::Result<PlatformConfig> {
    let Some(path) = std::env::var_os("KOVEN_CONFIG").map(PathBuf::from) else {
        return Ok(PlatformConfig::default());
    };

    match tokio::fs::read(&path).await {
        Ok(raw) => PlatformConfig::from_json(&raw)
            .with_context(|| format!("invalid config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(PlatformConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Incoming::Publish(message))) => {
                    if message.topic == TOPIC_EVENTS {
                        handle_event_frame(&app_state, &message.payload).await;
                    }
                }
                Ok(MqttEvent::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected, subscribing to {TOPIC_EVENTS}");
                    app_state.connected.store(true, Ordering::Relaxed);
                    if let Err(err) = app_state
                        .mqtt
                        .subscribe(TOPIC_EVENTS, QoS::AtLeastOnce)
                        .await
                    {
                        warn!("failed to subscribe to {TOPIC_EVENTS}: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    app_state.connected.store(false, Ordering::Relaxed);
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_event_frame(app_state: &AppState, payload: &[u8]) {
    debug!(
        "received event frame ({} bytes): {}",
        payload.len(),
        frame_hex(payload)
    );

    let event = match decode_event(payload) {
        Ok(event) => event,
        Err(err) => {
            warn!("failed to decode event frame: {err}");
            return;
        }
    };

    debug!(
        "event parsed: state={}, temp={}°C, remaining={:?}, programmed_temp={:?}, programmed_duration={:?}",
        event.state.as_str(),
        event.current_temperature,
        event.remaining_time,
        event.programmed_temperature,
        event.programmed_duration,
    );

    *app_state.latest.lock().await = Some(event);
    // No receivers just means no dashboard is open.
    let _ = app_state.events.send(event);
}

async fn send_command(app_state: &AppState, command: Command) -> anyhow::Result<()> {
    if !app_state.connected.load(Ordering::Relaxed) {
        bail!("mqtt client not connected");
    }

    let frame = encode_command_frame(&command);
    info!(
        "sending command: action={}, temperature={}°C, duration={}s",
        command.action.as_str(),
        command.temperature,
        command.duration
    );
    debug!("command frame: {}", frame_hex(&frame));

    app_state
        .mqtt
        .publish(TOPIC_COMMANDS, QoS::AtLeastOnce, false, frame.to_vec())
        .await
        .context("failed to publish command")?;
    Ok(())
}

fn parse_start_request(request: &StartCommandRequest) -> Result<Command, &'static str> {
    let temperature = request
        .temperature
        .trim()
        .parse::<i16>()
        .map_err(|_| "Invalid temperature value")?;
    let duration = request
        .duration
        .trim()
        .parse::<i16>()
        .map_err(|_| "Invalid duration value")?;
    Ok(Command::start(temperature, duration))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthBody {
        status: state.connected.load(Ordering::Relaxed),
        websocket_clients: state.ws_clients.load(Ordering::Relaxed),
    })
}

async fn handle_start(
    State(state): State<AppState>,
    body: Result<Json<StartCommandRequest>, JsonRejection>,
) -> axum::response::Response {
    let Ok(Json(request)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request body");
    };
    let command = match parse_start_request(&request) {
        Ok(command) => command,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    dispatch(&state, command).await
}

async fn handle_stop(State(state): State<AppState>) -> axum::response::Response {
    dispatch(&state, Command::stop()).await
}

async fn dispatch(state: &AppState, command: Command) -> axum::response::Response {
    if let Err(err) = send_command(state, command).await {
        warn!("failed to send command: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send command");
    }
    Json(StatusBody { status: "success" }).into_response()
}

async fn handle_get_state(State(state): State<AppState>) -> axum::response::Response {
    match *state.latest.lock().await {
        Some(event) => Json(event.message()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No event received yet"),
    }
}

async fn handle_ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_session(socket, state))
}

async fn websocket_session(mut socket: WebSocket, state: AppState) {
    let clients = state.ws_clients.fetch_add(1, Ordering::Relaxed) + 1;
    info!("websocket client connected ({clients} total)");
    let mut events = state.events.subscribe();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let body = match serde_json::to_string(&event.message()) {
                        Ok(body) => body,
                        Err(err) => {
                            warn!("event serialization failed: {err}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(body.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("websocket client lagging, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let clients = state.ws_clients.fetch_sub(1, Ordering::Relaxed) - 1;
    info!("websocket client disconnected ({clients} remaining)");
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
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
    info!("shutdown signal received");
}
