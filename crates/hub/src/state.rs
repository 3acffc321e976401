use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::calendar::{BookingCalendar, Slot};
use crate::plugs::{PlugBoard, PlugState};
use crate::quota::{QuotaBook, UserAccount};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub users: QuotaBook,
    pub plugs: PlugBoard,
    pub calendar: BookingCalendar,
    /// Date of the last midnight reset; the reset runs once per date.
    pub last_reset_date: NaiveDate,
    /// Poll ticks since startup. A plug with no telemetry at all counts as
    /// stale only after a couple of rounds have passed.
    pub poll_rounds: u64,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Telemetry,
    Switch,
    Quota,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub date: NaiveDate,
    pub users: Vec<UserAccount>,
    pub plugs: Vec<PlugState>,
    pub bookings: Vec<BookingView>,
    pub events: Vec<SystemEvent>,
}

#[derive(Serialize)]
pub struct BookingView {
    pub weekday: String,
    pub slot: String,
    pub username: String,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(window_start: Slot, window_end: Slot, today: NaiveDate) -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            users: QuotaBook::new(),
            plugs: PlugBoard::new(),
            calendar: BookingCalendar::new(window_start, window_end),
            last_reset_date: today,
            poll_rounds: 0,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a power reading from a plug (telemetry intake path).
    pub fn record_telemetry(&mut self, prefix: &str, watts: f64, is_on: bool) {
        let now = Utc::now();
        let updated = self.plugs.by_prefix_mut(prefix).map(|plug| {
            plug.last_power_watts = Some(watts);
            plug.is_on = is_on;
            plug.last_seen_at = Some(now);
            plug.name.clone()
        });
        match updated {
            Some(name) => self.record(EventKind::Telemetry, format!("{name}: {watts:.1} W")),
            None => self.record(
                EventKind::Error,
                format!("telemetry from unknown plug prefix '{prefix}'"),
            ),
        }
    }

    /// Record a relay ack ("stat/<prefix>/POWER" ON/OFF).
    pub fn record_relay_ack(&mut self, prefix: &str, on: bool) {
        let now = Utc::now();
        let updated = self.plugs.by_prefix_mut(prefix).map(|plug| {
            plug.is_on = on;
            plug.last_seen_at = Some(now);
            plug.name.clone()
        });
        if let Some(name) = updated {
            let state_str = if on { "ON" } else { "OFF" };
            self.record(EventKind::Switch, format!("{name} reports {state_str}"));
        }
    }

    /// Record a switch command we issued ourselves.
    pub fn record_switch(&mut self, plug_name: &str, on: bool) {
        let state_str = if on { "ON" } else { "OFF" };
        self.record(EventKind::Switch, format!("{plug_name} set {state_str}"));
    }

    /// Record a quota decision (debits, exhaustion, slot denials).
    pub fn record_quota(&mut self, detail: String) {
        self.record(EventKind::Quota, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.record(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.record(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            date: self.last_reset_date,
            users: self.users.iter().cloned().collect(),
            plugs: self.plugs.iter().cloned().collect(),
            bookings: self
                .calendar
                .entries()
                .map(|(day, slot, booking)| BookingView {
                    weekday: day.to_string(),
                    slot: slot.to_string(),
                    username: booking.username.clone(),
                })
                .collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    /// Append to the bounded event ring.
    pub fn record(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
