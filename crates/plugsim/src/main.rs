mod sim;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{PlugSim, Scenario};

/// Parse an "ON"/"OFF" relay command (case-insensitive, trims whitespace).
fn parse_power_command(payload: &[u8]) -> Option<bool> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let prefix = env::var("PLUG_PREFIX").unwrap_or_else(|_| "tasmota_SIM001".to_string());
    let scenario = Scenario::from_str_lossy(
        &env::var("SIM_SCENARIO").unwrap_or_default(),
    );
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let client_id = format!("plugsim-{prefix}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let plug = Arc::new(Mutex::new(PlugSim::new(scenario)));

    // Command intake: react to relay commands and ack like a real Tasmota.
    let cmnd_topic = format!("cmnd/{prefix}/POWER");
    let stat_topic = format!("stat/{prefix}/POWER");
    {
        let client = client.clone();
        let plug = plug.clone();
        let cmnd_topic = cmnd_topic.clone();
        let stat_topic = stat_topic.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("plugsim connected to mqtt");
                        if let Err(e) = client.subscribe(&cmnd_topic, QoS::AtLeastOnce).await {
                            warn!("subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) if p.topic == cmnd_topic => {
                        match parse_power_command(&p.payload) {
                            Some(on) => {
                                plug.lock().unwrap().set_relay(on);
                                let ack: &[u8] = if on { b"ON" } else { b"OFF" };
                                info!(relay = on, "relay command");
                                if let Err(e) = client
                                    .publish(&stat_topic, QoS::AtLeastOnce, false, ack)
                                    .await
                                {
                                    warn!("ack publish failed: {e}");
                                }
                            }
                            None => warn!("ignoring relay command (use ON/OFF)"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt error: {e}. retrying...");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    // Telemetry loop: periodic SENSOR publishes like a Tasmota energy plug.
    let tele_topic = format!("tele/{prefix}/SENSOR");
    info!(%tele_topic, %scenario, "publishing telemetry");

    loop {
        let (watts, drop) = {
            let mut plug = plug.lock().unwrap();
            (plug.sample(), plug.should_drop_sample())
        };

        if drop {
            info!("dropping telemetry sample (flaky mode)");
        } else {
            let payload = json!({
                "Time": chrono_free_timestamp(),
                "ENERGY": { "Power": (watts * 10.0).round() / 10.0 },
            });
            if let Err(e) = client
                .publish(&tele_topic, QoS::AtLeastOnce, false, payload.to_string())
                .await
            {
                warn!("publish error: {e}");
            } else {
                info!(watts = format!("{watts:.1}"), "published sample");
            }
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

/// Seconds since the epoch; the hub only cares about the ENERGY block.
fn chrono_free_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_power_command_accepts_on_off() {
        assert_eq!(parse_power_command(b"ON"), Some(true));
        assert_eq!(parse_power_command(b"off"), Some(false));
        assert_eq!(parse_power_command(b"  On\n"), Some(true));
    }

    #[test]
    fn parse_power_command_rejects_garbage() {
        assert_eq!(parse_power_command(b"TOGGLE"), None);
        assert_eq!(parse_power_command(b""), None);
    }

    #[test]
    fn telemetry_payload_shape() {
        let payload = json!({
            "Time": 1_700_000_000,
            "ENERGY": { "Power": 87.5 },
        });
        assert_eq!(payload["ENERGY"]["Power"], 87.5);
    }
}
