//! Runtime state of the metered smart plugs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::HubError;
use crate::quota::UserId;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PlugState {
    pub name: String,
    /// Tasmota-style topic prefix, e.g. "tasmota_512W10".
    pub topic_prefix: String,
    /// Admin kill-switch. A disabled plug is skipped by the poll tick.
    pub enabled: bool,
    /// At most one user at a time. Reverts to the fallback-owner on stop.
    pub assigned_user_id: Option<UserId>,
    /// Last observed relay state (telemetry, acks, or our own commands).
    pub is_on: bool,
    pub last_power_watts: Option<f64>,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Set while telemetry is stale; notices fire on the transition only.
    pub in_error: bool,
    /// Minutes this plug spent unreachable today (status report tally).
    pub error_minutes: i64,
    /// While positive, the plug is unmetered; decremented each poll tick.
    pub holiday_minutes: i64,
}

impl PlugState {
    pub fn new(name: impl Into<String>, topic_prefix: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            topic_prefix: topic_prefix.into(),
            enabled,
            assigned_user_id: None,
            is_on: false,
            last_power_watts: None,
            last_seen_at: None,
            in_error: false,
            error_minutes: 0,
            holiday_minutes: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PlugBoard {
    plugs: BTreeMap<String, PlugState>,
}

impl PlugBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plug: PlugState) {
        self.plugs.insert(plug.name.clone(), plug);
    }

    pub fn get(&self, name: &str) -> Result<&PlugState, HubError> {
        self.plugs
            .get(name)
            .ok_or_else(|| HubError::unknown_plug(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut PlugState, HubError> {
        self.plugs
            .get_mut(name)
            .ok_or_else(|| HubError::unknown_plug(name))
    }

    pub fn set_assigned_user(&mut self, name: &str, user_id: UserId) -> Result<(), HubError> {
        self.get_mut(name)?.assigned_user_id = Some(user_id);
        Ok(())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), HubError> {
        self.get_mut(name)?.enabled = enabled;
        Ok(())
    }

    /// Look up by MQTT topic prefix (telemetry arrives keyed this way).
    pub fn by_prefix_mut(&mut self, prefix: &str) -> Option<&mut PlugState> {
        self.plugs.values_mut().find(|p| p.topic_prefix == prefix)
    }

    /// The plug currently assigned to this user, if any.
    pub fn assigned_to(&self, user_id: UserId) -> Option<&PlugState> {
        self.plugs
            .values()
            .find(|p| p.assigned_user_id == Some(user_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlugState> {
        self.plugs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlugState> {
        self.plugs.values_mut()
    }

    pub fn len(&self) -> usize {
        self.plugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugs.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
