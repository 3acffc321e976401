//! TOML config file loading, validation, and state seeding for plugs and
//! users.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::calendar::Slot;
use crate::plugs::PlugState;
use crate::quota::{ResetPolicy, UserAccount, UserId};
use crate::state::SystemState;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    /// A plug drawing more than this is considered actively in use.
    #[serde(default = "default_power_threshold_watts")]
    pub power_threshold_watts: f64,
    /// Poll cadence; also the debit granularity.
    #[serde(default = "default_poll_interval_min")]
    pub poll_interval_min: i64,
    /// Cadence of the periodic household status report.
    #[serde(default = "default_status_interval_min")]
    pub status_interval_min: i64,
    /// A plug with no telemetry for this long counts as unreachable.
    #[serde(default = "default_offline_after_secs")]
    pub offline_after_secs: i64,

    /// Daily allotment for users not listing their own.
    #[serde(default = "default_daily_minutes")]
    pub default_daily_minutes: i64,
    #[serde(default)]
    pub reset_policy: ResetPolicy,

    #[serde(default = "default_booking_window_start")]
    pub booking_window_start: String,
    #[serde(default = "default_booking_window_end")]
    pub booking_window_end: String,

    /// The one user allowed to run admin commands.
    pub admin_user_id: UserId,
    /// Absorbs error minutes and takes over a plug after a stop.
    pub fallback_user_id: UserId,

    #[serde(default)]
    pub plugs: Vec<PlugEntry>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PlugEntry {
    pub name: String,
    pub topic_prefix: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserEntry {
    pub user_id: UserId,
    pub username: String,
    /// Overrides `default_daily_minutes` for this user.
    pub daily_minutes: Option<i64>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_power_threshold_watts() -> f64 {
    30.0
}
fn default_poll_interval_min() -> i64 {
    2
}
fn default_status_interval_min() -> i64 {
    30
}
fn default_offline_after_secs() -> i64 {
    80
}
fn default_daily_minutes() -> i64 {
    125
}
fn default_booking_window_start() -> String {
    "07:30".to_string()
}
fn default_booking_window_end() -> String {
    "24:00".to_string()
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_engine(&mut errors);
        self.validate_plugs(&mut errors);
        self.validate_users(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_engine(&self, errors: &mut Vec<String>) {
        if self.mqtt_host.trim().is_empty() {
            errors.push("mqtt_host is empty".to_string());
        }

        // ── Metering parameters ─────────────────────────────
        if self.power_threshold_watts < 0.0 {
            errors.push(format!(
                "power_threshold_watts must not be negative, got {}",
                self.power_threshold_watts
            ));
        }
        if self.poll_interval_min <= 0 {
            errors.push(format!(
                "poll_interval_min must be positive, got {}",
                self.poll_interval_min
            ));
        }
        if self.status_interval_min <= 0 {
            errors.push(format!(
                "status_interval_min must be positive, got {}",
                self.status_interval_min
            ));
        }
        if self.offline_after_secs <= 0 {
            errors.push(format!(
                "offline_after_secs must be positive, got {}",
                self.offline_after_secs
            ));
        } else if self.poll_interval_min > 0
            && self.offline_after_secs <= self.poll_interval_min * 60 / 2
        {
            errors.push(format!(
                "offline_after_secs ({}) is shorter than half the poll interval ({} min); \
                 every poll would see stale telemetry",
                self.offline_after_secs, self.poll_interval_min
            ));
        }
        if self.default_daily_minutes <= 0 {
            errors.push(format!(
                "default_daily_minutes must be positive, got {}",
                self.default_daily_minutes
            ));
        }

        // ── Booking window ──────────────────────────────────
        match self.booking_window() {
            Ok((start, end)) => {
                if start >= end {
                    errors.push(format!(
                        "booking_window_start ({start}) must be before booking_window_end ({end})"
                    ));
                }
            }
            Err(e) => errors.push(format!("booking window: {e}")),
        }
    }

    fn validate_plugs(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_prefixes: HashSet<&str> = HashSet::new();

        for (i, p) in self.plugs.iter().enumerate() {
            let ctx = || {
                if p.name.is_empty() {
                    format!("plugs[{i}]")
                } else {
                    format!("plug '{}'", p.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&p.name) {
                errors.push(format!("{}: duplicate plug name", ctx()));
            }

            if p.topic_prefix.trim().is_empty() {
                errors.push(format!("{}: topic_prefix is empty", ctx()));
            } else if p.topic_prefix.contains('/') || p.topic_prefix.contains(['+', '#']) {
                errors.push(format!(
                    "{}: topic_prefix '{}' must be a single topic segment",
                    ctx(),
                    p.topic_prefix
                ));
            } else if !seen_prefixes.insert(&p.topic_prefix) {
                errors.push(format!(
                    "{}: topic_prefix '{}' is already used by another plug",
                    ctx(),
                    p.topic_prefix
                ));
            }
        }
    }

    fn validate_users(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<UserId> = HashSet::new();
        let mut seen_names: HashSet<String> = HashSet::new();

        for (i, u) in self.users.iter().enumerate() {
            let ctx = || {
                if u.username.is_empty() {
                    format!("users[{i}]")
                } else {
                    format!("user '{}'", u.username)
                }
            };

            if u.username.trim().is_empty() {
                errors.push(format!("{}: username is empty", ctx()));
            } else if !seen_names.insert(u.username.to_lowercase()) {
                errors.push(format!("{}: duplicate username", ctx()));
            }

            if !seen_ids.insert(u.user_id) {
                errors.push(format!("{}: duplicate user_id {}", ctx(), u.user_id));
            }

            if let Some(minutes) = u.daily_minutes {
                if minutes <= 0 {
                    errors.push(format!(
                        "{}: daily_minutes must be positive, got {minutes}",
                        ctx()
                    ));
                }
            }
        }

        // The fallback owner must exist; error minutes have to land somewhere.
        if !self.users.iter().any(|u| u.user_id == self.fallback_user_id) {
            errors.push(format!(
                "fallback_user_id {} does not match any configured user",
                self.fallback_user_id
            ));
        }
    }

    /// Parsed booking window, (inclusive start, exclusive end).
    pub fn booking_window(&self) -> std::result::Result<(Slot, Slot), crate::error::HubError> {
        Ok((
            self.booking_window_start.parse()?,
            self.booking_window_end.parse()?,
        ))
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed plugs and users from the config into a fresh state. Runs before the
/// snapshot is applied, so restored accounts overwrite the seeds.
pub fn apply(config: &Config, state: &mut SystemState) {
    for p in &config.plugs {
        state
            .plugs
            .insert(PlugState::new(&p.name, &p.topic_prefix, p.enabled));
    }

    for u in &config.users {
        state.users.insert(UserAccount::new(
            u.user_id,
            &u.username,
            u.daily_minutes.unwrap_or(config.default_daily_minutes),
        ));
    }

    tracing::info!(
        plugs = config.plugs.len(),
        users = config.users.len(),
        "config applied"
    );
}

// ===========================================================================
// Tests
// ===========================================================================
