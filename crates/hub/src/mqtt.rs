//! Tasmota-flavoured MQTT plumbing: topic helpers, payload parsers, and the
//! outbound switch capability used by the engine.

use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, QoS};

use crate::error::HubError;

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract the device prefix from "tele/<prefix>/SENSOR".
pub(crate) fn extract_sensor_prefix(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "SENSOR" {
        Some(parts[1])
    } else {
        None
    }
}

/// Extract the device prefix from "stat/<prefix>/POWER".
pub(crate) fn extract_stat_prefix(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "stat" && parts[2] == "POWER" {
        Some(parts[1])
    } else {
        None
    }
}

/// Command topic for a device: "cmnd/<prefix>/POWER".
pub(crate) fn command_topic(prefix: &str) -> String {
    format!("cmnd/{prefix}/POWER")
}

/// Pull a wattage out of a Tasmota SENSOR payload. Accepts the usual
/// `{"ENERGY":{"Power":42.0}}` shape as well as a bare `"POWER"` field
/// (numeric or numeric string) from simpler firmwares.
pub(crate) fn parse_sensor_watts(payload: &[u8]) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    if let Some(w) = value.get("ENERGY").and_then(|e| e.get("Power")) {
        return w.as_f64();
    }
    match value.get("POWER") {
        Some(w) if w.is_number() => w.as_f64(),
        Some(w) => w.as_str()?.trim().parse().ok(),
        None => None,
    }
}

/// Parse an "ON"/"OFF" relay payload (case-insensitive, trims whitespace).
pub(crate) fn parse_power_state(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown power state '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// Outbound switch capability
// ---------------------------------------------------------------------------

/// The one thing the engine may ask of the plug network layer: flip a relay.
/// Implementations must apply a bounded timeout; the engine treats failures
/// as a disconnect, never a crash. Tests use an in-memory fake.
pub trait PowerSwitch: Send + Sync {
    fn set_power(
        &self,
        topic_prefix: &str,
        on: bool,
    ) -> impl Future<Output = Result<(), HubError>> + Send;
}

/// MQTT-backed switch publishing to "cmnd/<prefix>/POWER".
#[derive(Clone)]
pub struct MqttSwitch {
    client: AsyncClient,
    timeout: Duration,
}

impl MqttSwitch {
    pub fn new(client: AsyncClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl PowerSwitch for MqttSwitch {
    fn set_power(
        &self,
        topic_prefix: &str,
        on: bool,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        let topic = command_topic(topic_prefix);
        let payload: &[u8] = if on { b"ON" } else { b"OFF" };
        let client = self.client.clone();
        let timeout = self.timeout;
        let prefix = topic_prefix.to_string();
        async move {
            match tokio::time::timeout(
                timeout,
                client.publish(topic, QoS::AtLeastOnce, false, payload),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    tracing::warn!(plug = %prefix, "mqtt publish failed: {e}");
                    Err(HubError::PlugUnreachable(prefix))
                }
                Err(_) => {
                    tracing::warn!(plug = %prefix, "mqtt publish timed out");
                    Err(HubError::PlugUnreachable(prefix))
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- extract_sensor_prefix ----------------------------------------------

    #[test]
    fn sensor_prefix_valid_topic() {
        assert_eq!(
            extract_sensor_prefix("tele/tasmota_512W10/SENSOR"),
            Some("tasmota_512W10")
        );
    }

    #[test]
    fn sensor_prefix_wrong_head() {
        assert_eq!(extract_sensor_prefix("stat/tasmota_512W10/SENSOR"), None);
    }

    #[test]
    fn sensor_prefix_wrong_tail() {
        assert_eq!(extract_sensor_prefix("tele/tasmota_512W10/STATE"), None);
    }

    #[test]
    fn sensor_prefix_segment_count() {
        assert_eq!(extract_sensor_prefix("tele/SENSOR"), None);
        assert_eq!(extract_sensor_prefix("tele/a/b/SENSOR"), None);
        assert_eq!(extract_sensor_prefix(""), None);
    }

    // -- extract_stat_prefix -------------------------------------------------

    #[test]
    fn stat_prefix_valid_topic() {
        assert_eq!(
            extract_stat_prefix("stat/tasmota_QBCD19/POWER"),
            Some("tasmota_QBCD19")
        );
    }

    #[test]
    fn stat_prefix_rejects_other_shapes() {
        assert_eq!(extract_stat_prefix("stat/tasmota_QBCD19/RESULT"), None);
        assert_eq!(extract_stat_prefix("tele/tasmota_QBCD19/POWER"), None);
        assert_eq!(extract_stat_prefix("stat/POWER"), None);
    }

    // -- command_topic -------------------------------------------------------

    #[test]
    fn command_topic_shape() {
        assert_eq!(command_topic("tasmota_512W10"), "cmnd/tasmota_512W10/POWER");
    }

    // -- parse_sensor_watts --------------------------------------------------

    #[test]
    fn sensor_watts_from_energy_block() {
        let payload = br#"{"Time":"2026-08-27T10:00:00","ENERGY":{"Power":87.5,"Voltage":230}}"#;
        assert_eq!(parse_sensor_watts(payload), Some(87.5));
    }

    #[test]
    fn sensor_watts_from_bare_power_number() {
        assert_eq!(parse_sensor_watts(br#"{"POWER":42}"#), Some(42.0));
    }

    #[test]
    fn sensor_watts_from_power_string() {
        assert_eq!(parse_sensor_watts(br#"{"POWER":"12.5"}"#), Some(12.5));
    }

    #[test]
    fn sensor_watts_missing_fields() {
        assert_eq!(parse_sensor_watts(br#"{"Time":"x"}"#), None);
        assert_eq!(parse_sensor_watts(br#"{"ENERGY":{}}"#), None);
    }

    #[test]
    fn sensor_watts_invalid_json() {
        assert_eq!(parse_sensor_watts(b"not json"), None);
        assert_eq!(parse_sensor_watts(b""), None);
    }

    // -- parse_power_state ---------------------------------------------------

    #[test]
    fn power_state_on_off() {
        assert_eq!(parse_power_state(b"ON"), Ok(true));
        assert_eq!(parse_power_state(b"OFF"), Ok(false));
    }

    #[test]
    fn power_state_case_and_whitespace() {
        assert_eq!(parse_power_state(b"on"), Ok(true));
        assert_eq!(parse_power_state(b"  oFf\n"), Ok(false));
    }

    #[test]
    fn power_state_garbage() {
        assert!(parse_power_state(b"TOGGLE").is_err());
        assert!(parse_power_state(b"").is_err());
    }
}
