mod calendar;
mod config;
mod engine;
mod error;
mod mqtt;
mod notify;
mod persist;
mod plugs;
mod quota;
mod state;
mod web;

use anyhow::{Context, Result};
use chrono::Local;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineConfig};
use mqtt::{extract_sensor_prefix, extract_stat_prefix, parse_power_state, parse_sensor_watts, MqttSwitch};
use notify::Notifier;
use state::{SharedState, SystemState};
use web::WebState;

/// Timeout for a single relay command publish.
const SWITCH_TIMEOUT_SEC: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config + persisted state ────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    let state_path = PathBuf::from(env::var("STATE_PATH").unwrap_or_else(|_| "state.json".to_string()));

    let (window_start, window_end) = cfg
        .booking_window()
        .context("booking window in config is invalid")?;
    let mut st = SystemState::new(window_start, window_end, Local::now().date_naive());
    config::apply(&cfg, &mut st);

    match persist::load(&state_path)? {
        Some(snapshot) => {
            snapshot.apply(&mut st);
            info!(path = %state_path.display(), "state snapshot restored");
        }
        None => info!(path = %state_path.display(), "no state snapshot, starting fresh"),
    }
    st.record_system("hub started".to_string());

    let shared: SharedState = Arc::new(RwLock::new(st));

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("plugtime-hub", cfg.mqtt_host.clone(), cfg.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    client.subscribe("tele/+/SENSOR", QoS::AtLeastOnce).await?;
    client.subscribe("stat/+/POWER", QoS::AtLeastOnce).await?;
    info!("subscribed to tele/+/SENSOR and stat/+/POWER");

    // ── Engine + notifier ───────────────────────────────────────────
    let notifier = Notifier::new();
    let switch = MqttSwitch::new(client.clone(), Duration::from_secs(SWITCH_TIMEOUT_SEC));
    let engine = Arc::new(Engine::new(
        shared.clone(),
        switch,
        notifier.clone(),
        EngineConfig::from(&cfg),
        Some(state_path),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Forward household notices to the log. A chat frontend would subscribe
    // here instead.
    let mut notices = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => match serde_json::to_string(&notice) {
                    Ok(json) => info!(target: "notice", "{json}"),
                    Err(e) => warn!("unserializable notice: {e}"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("notice forwarder lagged, dropped {n}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Web server ──────────────────────────────────────────────────
    tokio::spawn(web::serve(WebState {
        shared: shared.clone(),
        engine: engine.clone(),
    }));

    // ── Engine loop ─────────────────────────────────────────────────
    let engine_task = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        async move { engine.run(shutdown).await }
    });

    // ── Ctrl-C → shutdown signal ────────────────────────────────────
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    // ── MQTT intake loop ────────────────────────────────────────────
    let mut shutdown = shutdown_rx;
    loop {
        tokio::select! {
            event = eventloop.poll() => handle_mqtt_event(event, &shared).await,
            _ = shutdown.changed() => break,
        }
    }

    // Let the engine finish any in-flight tick, then write a final snapshot.
    let _ = engine_task.await;
    engine.persist().await;
    info!("hub stopped");
    Ok(())
}

async fn handle_mqtt_event(
    event: Result<Event, rumqttc::ConnectionError>,
    shared: &SharedState,
) {
    match event {
        Ok(Event::Incoming(Packet::Publish(p))) => {
            let topic = p.topic.clone();
            let payload = p.payload.to_vec();

            if let Some(prefix) = extract_sensor_prefix(&topic) {
                match parse_sensor_watts(&payload) {
                    Some(watts) => {
                        // Any measurable draw means the relay is on.
                        let is_on = watts > 0.0;
                        let mut st = shared.write().await;
                        st.record_telemetry(prefix, watts, is_on);
                    }
                    None => {
                        warn!(%topic, "sensor payload without a power reading");
                    }
                }
            } else if let Some(prefix) = extract_stat_prefix(&topic) {
                match parse_power_state(&payload) {
                    Ok(on) => {
                        let mut st = shared.write().await;
                        st.record_relay_ack(prefix, on);
                    }
                    Err(msg) => {
                        warn!(%topic, "{msg}");
                        let mut st = shared.write().await;
                        st.record_error(msg);
                    }
                }
            }
        }
        Ok(Event::Incoming(Packet::ConnAck(_))) => {
            info!("mqtt connected");
            let mut st = shared.write().await;
            st.mqtt_connected = true;
            st.record_system("mqtt connected".to_string());
        }
        Ok(Event::Incoming(Packet::Disconnect)) => {
            warn!("mqtt disconnected");
            let mut st = shared.write().await;
            st.mqtt_connected = false;
            st.record_system("mqtt disconnected".to_string());
        }
        Ok(_) => {}
        Err(e) => {
            error!("mqtt error: {e}. reconnecting...");
            let mut st = shared.write().await;
            st.mqtt_connected = false;
            st.record_error(format!("mqtt error: {e}"));
            drop(st);

            sleep(Duration::from_secs(2)).await;
        }
    }
}
