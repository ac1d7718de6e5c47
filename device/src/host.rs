use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use devtwin_common::{
    topics, HubConfig, InboundMessage, ReportedProperty, StatsSnapshot, TwinConfig, TwinEngine,
    TwinUpdateKind,
};

use crate::handlers;

const MAX_MQTT_PAYLOAD_BYTES: usize = 64 * 1024;
const REPORT_DRAIN_INTERVAL_MS: u64 = 250;
const TELEMETRY_INTERVAL_SECS: u64 = 30;

#[derive(Clone)]
struct AppState {
    engine: Arc<TwinEngine>,
    hub: Arc<HubConfig>,
    mqtt: AsyncClient,
    request_id: Arc<AtomicU64>,
    started: Instant,
}

#[derive(Debug, Serialize)]
struct DeviceInfo {
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "hubName")]
    hub_name: String,
    hostname: String,
    #[serde(rename = "firmwareVersion")]
    firmware_version: &'static str,
    #[serde(rename = "queueDepth")]
    queue_depth: usize,
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct TelemetryPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    timestamp: String,
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: u64,
    stats: StatsSnapshot,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let hub = load_hub_config()?;
    info!(
        "device {} on hub {} (f/w {})",
        hub.device_id,
        hub.hub_name(),
        env!("CARGO_PKG_VERSION")
    );

    let mut engine = TwinEngine::new(TwinConfig::default());
    handlers::register_defaults(&mut engine);

    let mut mqtt_options =
        MqttOptions::new(hub.device_id.clone(), hub.hostname.clone(), hub.mqtt_port);
    mqtt_options.set_max_packet_size(MAX_MQTT_PAYLOAD_BYTES, MAX_MQTT_PAYLOAD_BYTES);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        engine: Arc::new(engine),
        hub: Arc::new(hub),
        mqtt,
        request_id: Arc::new(AtomicU64::new(0)),
        started: Instant::now(),
    };

    subscribe_topics(&app_state.mqtt, &app_state.hub).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_report_drain_loop(app_state.clone());
    spawn_telemetry_loop(app_state.clone());

    let app = Router::new()
        .route("/api/stats", get(handle_get_stats))
        .route("/api/device", get(handle_get_device))
        .with_state(app_state);

    let port = std::env::var("DEVTWIN_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status api listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_hub_config() -> anyhow::Result<HubConfig> {
    let mut hub = match std::env::var("DEVTWIN_CONNECTION_STRING") {
        Ok(raw) => {
            HubConfig::from_connection_string(&raw).context("invalid DEVTWIN_CONNECTION_STRING")?
        }
        Err(_) => HubConfig::default(),
    };

    if let Ok(host) = std::env::var("MQTT_HOST") {
        hub.hostname = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        hub.mqtt_port = port;
    }
    Ok(hub)
}

async fn subscribe_topics(mqtt: &AsyncClient, hub: &HubConfig) -> anyhow::Result<()> {
    let filters = [
        topics::TOPIC_TWIN_RESPONSE_FILTER.to_string(),
        topics::TOPIC_DESIRED_PATCH_FILTER.to_string(),
        topics::TOPIC_METHOD_POST_FILTER.to_string(),
        topics::devicebound_filter(&hub.device_id),
    ];

    for filter in filters {
        mqtt.subscribe(filter, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected; requesting full twin");
                    request_full_twin(&app_state).await;
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

/// Asks the hub for a complete twin snapshot. The response lands on the twin
/// response topic and goes through full-snapshot reconciliation, so a
/// reconnect flood of already-applied desired properties converges without
/// re-firing handlers.
async fn request_full_twin(app_state: &AppState) {
    let rid = next_request_id(app_state);
    if let Err(err) = app_state
        .mqtt
        .publish(topics::twin_get_topic(rid), QoS::AtLeastOnce, false, "")
        .await
    {
        warn!("full twin request failed: {err}");
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    if topics::is_desired_patch(&topic) {
        let document = serde_json::from_slice(&payload).context("non json desired patch")?;
        app_state.engine.process(InboundMessage::TwinUpdate {
            kind: TwinUpdateKind::Partial,
            document,
        })?;
        return Ok(());
    }

    if let Some((status, rid)) = topics::parse_twin_response(&topic) {
        // Only the GET response carries a body; reported-patch
        // acknowledgements come back here with an empty payload.
        if status == 200 && !payload.is_empty() {
            let document = serde_json::from_slice(&payload).context("non json twin snapshot")?;
            app_state.engine.process(InboundMessage::TwinUpdate {
                kind: TwinUpdateKind::Full,
                document,
            })?;
        } else {
            debug!("twin response status {status} for request {rid}");
        }
        return Ok(());
    }

    if let Some((name, rid)) = topics::parse_method_invocation(&topic) {
        let document = if payload.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&payload).context("non json method payload")?)
        };
        let outcome = app_state.engine.process(InboundMessage::DirectMethod {
            name: name.to_string(),
            payload: document,
        })?;
        respond_to_method(app_state, rid, outcome).await;
        return Ok(());
    }

    if topic.starts_with(&topics::devicebound_prefix(&app_state.hub.device_id)) {
        let document = serde_json::from_slice(&payload).context("non json c2d message")?;
        app_state
            .engine
            .process(InboundMessage::CloudMessage { document })?;
        return Ok(());
    }

    debug!("ignoring message on topic {topic}");
    Ok(())
}

async fn respond_to_method(
    app_state: &AppState,
    rid: &str,
    outcome: Option<devtwin_common::HandlerOutcome>,
) {
    let (status, body) = match outcome {
        Some(outcome) => {
            let body = serde_json::json!({"status": outcome.status_text()});
            (outcome.status_code, body)
        }
        None => (404, serde_json::json!({"status": "not found"})),
    };

    if let Err(err) = app_state
        .mqtt
        .publish(
            topics::method_response_topic(status, rid),
            QoS::AtLeastOnce,
            false,
            body.to_string(),
        )
        .await
    {
        warn!("method response publish failed: {err}");
    }
}

/// Consumer side of the deferred report queue: drains whatever the
/// reconciliation path queued, publishes each envelope, then yields until
/// the next tick.
fn spawn_report_drain_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(REPORT_DRAIN_INTERVAL_MS));
        loop {
            interval.tick().await;
            while let Some(envelope) = app_state.engine.report_queue().pop() {
                publish_report(&app_state, envelope).await;
            }
        }
    });
}

async fn publish_report(app_state: &AppState, envelope: ReportedProperty) {
    let wire = match envelope.to_wire() {
        Ok(wire) => wire,
        Err(err) => {
            app_state.engine.stats().record_report_failure();
            warn!("reported property serialization failed: {err}");
            return;
        }
    };

    let rid = next_request_id(app_state);
    match app_state
        .mqtt
        .publish(
            topics::reported_patch_topic(rid),
            QoS::AtLeastOnce,
            false,
            wire,
        )
        .await
    {
        Ok(()) => {
            app_state.engine.stats().record_reported();
            info!(
                "desired property {} echoed back as a reported property",
                envelope.name
            );
        }
        Err(err) => {
            app_state.engine.stats().record_report_failure();
            warn!(
                "desired property {} failed to echo back: {err}",
                envelope.name
            );
        }
    }
}

fn spawn_telemetry_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TELEMETRY_INTERVAL_SECS));
        loop {
            interval.tick().await;

            let payload = TelemetryPayload {
                device_id: &app_state.hub.device_id,
                timestamp: Utc::now().to_rfc3339(),
                uptime_seconds: app_state.started.elapsed().as_secs(),
                stats: app_state.engine.stats().snapshot(),
            };

            match serde_json::to_vec(&payload) {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(
                            topics::telemetry_topic(&app_state.hub.device_id),
                            QoS::AtLeastOnce,
                            false,
                            body,
                        )
                        .await
                    {
                        warn!("telemetry publish failed: {err}");
                    }
                }
                Err(err) => warn!("telemetry serialization failed: {err}"),
            }
        }
    });
}

fn next_request_id(app_state: &AppState) -> u64 {
    app_state.request_id.fetch_add(1, Ordering::Relaxed) + 1
}

async fn handle_get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.stats().snapshot())
}

async fn handle_get_device(State(state): State<AppState>) -> impl IntoResponse {
    Json(DeviceInfo {
        device_id: state.hub.device_id.clone(),
        hub_name: state.hub.hub_name().to_string(),
        hostname: state.hub.hostname.clone(),
        firmware_version: env!("CARGO_PKG_VERSION"),
        queue_depth: state.engine.report_queue().len(),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}
