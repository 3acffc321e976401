//! Screen-time engine: polls plug power, debits minute budgets, enforces the
//! booking calendar, and runs the midnight reset.
//!
//! The engine is a decision loop over shared state. Each poll tick classifies
//! every plug into a phase and mutates budgets under the write lock; switch
//! commands are collected and sent only after the lock is dropped, so a slow
//! broker never stalls state access.
//!
//! ## Per-plug phases (computed fresh each tick)
//!
//! ```text
//! Idle      relay off, nothing to do
//! StandbyOn relay on but draw below the threshold; no debit
//! Active    draw above the threshold; debit the assigned user
//! Error     telemetry stale; minutes land on the fallback owner
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::calendar::Slot;
use crate::config::Config;
use crate::error::HubError;
use crate::mqtt::PowerSwitch;
use crate::notify::{Notice, Notifier};
use crate::persist::Snapshot;
use crate::quota::{ResetPolicy, UserId};
use crate::state::{EventKind, SharedState, SystemState};

/// Warn a user once their balance first drops to this mark or below.
const LOW_MINUTES_MARK: i64 = 6;

/// Cadence of the midnight-reset date check.
const MIDNIGHT_CHECK_SEC: u64 = 30;

/// A plug that has never reported counts as unreachable only after this many
/// poll rounds, giving telemetry time to arrive after startup.
const STARTUP_GRACE_ROUNDS: u64 = 2;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    StandbyOn,
    Active,
    Error,
}

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub power_threshold_watts: f64,
    pub poll_interval_min: i64,
    pub status_interval_min: i64,
    pub offline_after_secs: i64,
    pub default_daily_minutes: i64,
    pub reset_policy: ResetPolicy,
    pub admin_user_id: UserId,
    pub fallback_user_id: UserId,
}

impl From<&Config> for EngineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            mqtt_host: cfg.mqtt_host.clone(),
            mqtt_port: cfg.mqtt_port,
            power_threshold_watts: cfg.power_threshold_watts,
            poll_interval_min: cfg.poll_interval_min,
            status_interval_min: cfg.status_interval_min,
            offline_after_secs: cfg.offline_after_secs,
            default_daily_minutes: cfg.default_daily_minutes,
            reset_policy: cfg.reset_policy,
            admin_user_id: cfg.admin_user_id,
            fallback_user_id: cfg.fallback_user_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands and replies
// ---------------------------------------------------------------------------

/// Everything a household member (or the admin) can ask of the hub.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Register { user_id: UserId, username: String },
    Help,
    Status,
    ListPlugs,
    StartPlug { user_id: UserId, plug: String },
    /// With no plug name, stops the caller's currently attached plug.
    StopPlug {
        user_id: UserId,
        #[serde(default)]
        plug: Option<String>,
    },
    /// Admins may pass a target (id or @username) to view someone else's.
    MyBookings {
        user_id: UserId,
        #[serde(default)]
        target: Option<String>,
    },
    Calendar,
    // ── Admin only ─────────────────────────────────────────
    AddMinutes { user_id: UserId, target: String, minutes: i64 },
    SetDailyMinutes { user_id: UserId, target: String, minutes: i64 },
    HolidayTimer { user_id: UserId, plug: String, minutes: i64 },
    Book { user_id: UserId, target: String, weekday: String, slot: String },
    Unbook { user_id: UserId, weekday: String, slot: String },
    Activate { user_id: UserId, plug: String, enabled: bool },
    PlugPower { user_id: UserId, plug: String, on: bool },
}

#[derive(Debug, Serialize)]
pub struct Reply {
    pub text: String,
}

impl Reply {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Deferred side effects
// ---------------------------------------------------------------------------

/// A switch command decided under the lock, executed after it is dropped.
struct SwitchAction {
    plug_name: String,
    topic_prefix: String,
    on: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine<S: PowerSwitch> {
    shared: SharedState,
    switch: S,
    notifier: Notifier,
    cfg: EngineConfig,
    state_path: Option<PathBuf>,
}

impl<S: PowerSwitch> Engine<S> {
    pub fn new(
        shared: SharedState,
        switch: S,
        notifier: Notifier,
        cfg: EngineConfig,
        state_path: Option<PathBuf>,
    ) -> Self {
        Self {
            shared,
            switch,
            notifier,
            cfg,
            state_path,
        }
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run the poll / status / midnight loop until shutdown is signalled.
    /// Intended to be `tokio::spawn`-ed from main.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll =
            tokio::time::interval(Duration::from_secs(self.cfg.poll_interval_min as u64 * 60));
        let mut status =
            tokio::time::interval(Duration::from_secs(self.cfg.status_interval_min as u64 * 60));
        let mut midnight = tokio::time::interval(Duration::from_secs(MIDNIGHT_CHECK_SEC));

        // The first poll tick fires immediately; skip it so telemetry has a
        // full interval to arrive before the first metering pass.
        poll.tick().await;

        info!(
            poll_min = self.cfg.poll_interval_min,
            status_min = self.cfg.status_interval_min,
            threshold_w = self.cfg.power_threshold_watts,
            "engine started"
        );
        {
            let mut st = self.shared.write().await;
            st.record_system("engine started".to_string());
        }
        self.broadcast_startup().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.poll_tick(Local::now().naive_local()).await;
                    self.persist().await;
                }
                _ = status.tick() => {
                    self.broadcast_status().await;
                }
                _ = midnight.tick() => {
                    self.midnight_check(Local::now().date_naive()).await;
                }
                _ = shutdown.changed() => {
                    info!("engine stopping");
                    break;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Poll tick
    // -----------------------------------------------------------------------

    /// One metering pass over every plug. `now` is local wall-clock time and
    /// decides the current calendar slot.
    pub async fn poll_tick(&self, now: NaiveDateTime) {
        let interval = self.cfg.poll_interval_min;
        let weekday = now.weekday();
        let slot = Slot::containing(now.time());

        let mut actions: Vec<SwitchAction> = Vec::new();
        let mut notices: Vec<Notice> = Vec::new();

        {
            let mut guard = self.shared.write().await;
            let st = &mut *guard;
            let rounds = st.poll_rounds;
            let mut events: Vec<(EventKind, String)> = Vec::new();

            let fallback = self.cfg.fallback_user_id;
            let fallback_name = st
                .users
                .get(fallback)
                .map(|a| a.username.clone())
                .unwrap_or_else(|_| fallback.to_string());

            let SystemState {
                plugs,
                users,
                calendar,
                ..
            } = st;

            for plug in plugs.iter_mut() {
                if !plug.enabled {
                    continue;
                }

                // Holiday timer: unmetered while it runs.
                if plug.holiday_minutes > 0 {
                    plug.holiday_minutes = (plug.holiday_minutes - interval).max(0);
                    if plug.holiday_minutes == 0 {
                        events.push((
                            EventKind::System,
                            format!("{}: holiday timer expired", plug.name),
                        ));
                    }
                    continue;
                }

                let phase = classify(plug, rounds, &self.cfg);

                // ── Error phase ──────────────────────────────────────
                if phase == Phase::Error {
                    if !plug.in_error {
                        plug.in_error = true;
                        notices.push(Notice::ErrorMinutesAccrued {
                            plug: plug.name.clone(),
                            username: fallback_name.clone(),
                            minutes: interval,
                        });
                        events.push((
                            EventKind::Error,
                            format!("{}: telemetry stale, charging @{fallback_name}", plug.name),
                        ));
                    }
                    plug.error_minutes += interval;
                    let _ = users.add_error_minutes(fallback, interval);
                    continue;
                }
                if plug.in_error {
                    plug.in_error = false;
                    events.push((EventKind::System, format!("{}: back online", plug.name)));
                }

                if phase != Phase::Active {
                    continue;
                }

                // ── Active: slot check, then debit ───────────────────
                let user_id = plug.assigned_user_id.unwrap_or(fallback);
                let Ok(account) = users.get(user_id) else {
                    events.push((
                        EventKind::Error,
                        format!("{}: assigned user {user_id} unknown", plug.name),
                    ));
                    continue;
                };
                let username = account.username.clone();

                if !calendar.is_user_allowed(weekday, slot, user_id) {
                    let booked_by = calendar
                        .booking_at(weekday, slot)
                        .map(|b| b.username.clone())
                        .unwrap_or_default();
                    actions.push(SwitchAction {
                        plug_name: plug.name.clone(),
                        topic_prefix: plug.topic_prefix.clone(),
                        on: false,
                    });
                    notices.push(Notice::SlotDenied {
                        username: username.clone(),
                        plug: plug.name.clone(),
                        booked_by: booked_by.clone(),
                    });
                    events.push((
                        EventKind::Quota,
                        format!("{}: {slot} is booked for @{booked_by}, cutting power", plug.name),
                    ));
                    continue;
                }

                let before = account.remaining_minutes;
                let debited = users.debit(user_id, interval).unwrap_or(0);
                let after = before - debited;
                events.push((
                    EventKind::Quota,
                    format!("{}: @{username} used {debited} min, {after} left", plug.name),
                ));

                if after <= 0 {
                    // The interval just consumed was the last one.
                    actions.push(SwitchAction {
                        plug_name: plug.name.clone(),
                        topic_prefix: plug.topic_prefix.clone(),
                        on: false,
                    });
                    notices.push(Notice::QuotaExhausted {
                        username: username.clone(),
                        plug: plug.name.clone(),
                    });
                } else if before > LOW_MINUTES_MARK && after <= LOW_MINUTES_MARK {
                    notices.push(Notice::LowMinutes {
                        username: username.clone(),
                        remaining: after,
                    });
                }
            }

            st.poll_rounds += 1;
            for (kind, detail) in events {
                st.record(kind, detail);
            }
        }

        self.execute(actions).await;
        for notice in notices {
            self.notifier.publish(notice);
        }
    }

    // -----------------------------------------------------------------------
    // Midnight reset
    // -----------------------------------------------------------------------

    /// Reset budgets if the date has rolled over. Idempotent within a day.
    pub async fn midnight_check(&self, today: NaiveDate) {
        let mut st = self.shared.write().await;
        if st.last_reset_date >= today {
            return;
        }

        let report = daily_report_text(&st);
        st.users.reset_daily(self.cfg.reset_policy);
        for plug in st.plugs.iter_mut() {
            plug.error_minutes = 0;
        }
        st.last_reset_date = today;
        st.record_system(format!("daily reset ({today})"));
        drop(st);

        info!(%today, "daily reset");
        self.notifier.publish(Notice::DailyReport { text: report });
        // A crash before the next poll tick must not roll back the reset.
        self.persist().await;
    }

    // -----------------------------------------------------------------------
    // Status report
    // -----------------------------------------------------------------------

    pub async fn broadcast_status(&self) {
        let text = {
            let st = self.shared.read().await;
            status_text(&st)
        };
        self.notifier.publish(Notice::StatusReport { text });
    }

    /// Boot-time report: config summary plus the usual status lines.
    pub async fn broadcast_startup(&self) {
        let text = {
            let st = self.shared.read().await;
            format!(
                "hub up: broker {}:{}, {} W threshold, metering every {} min\n{}",
                self.cfg.mqtt_host,
                self.cfg.mqtt_port,
                self.cfg.power_threshold_watts,
                self.cfg.poll_interval_min,
                status_text(&st)
            )
        };
        self.notifier.publish(Notice::StatusReport { text });
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Save the snapshot if a state path is configured. Failures are logged
    /// and retried on the next cycle.
    pub async fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let snapshot = {
            let st = self.shared.read().await;
            Snapshot::capture(&st)
        };
        if let Err(e) = crate::persist::save(path, &snapshot) {
            warn!("state snapshot failed: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------------

    /// Dispatch at the current wall-clock time.
    pub async fn dispatch(&self, cmd: Command) -> Result<Reply, HubError> {
        self.dispatch_at(cmd, Local::now().naive_local()).await
    }

    pub async fn dispatch_at(
        &self,
        cmd: Command,
        now: NaiveDateTime,
    ) -> Result<Reply, HubError> {
        let mutating = !matches!(
            cmd,
            Command::Help
                | Command::Status
                | Command::ListPlugs
                | Command::MyBookings { .. }
                | Command::Calendar
        );
        let reply = self.handle(cmd, now).await?;
        if mutating {
            self.persist().await;
        }
        Ok(reply)
    }

    async fn handle(&self, cmd: Command, now: NaiveDateTime) -> Result<Reply, HubError> {
        match cmd {
            Command::Register { user_id, username } => self.register(user_id, &username).await,
            Command::Help => Ok(Reply::new(HELP_TEXT)),
            Command::Status => {
                let st = self.shared.read().await;
                Ok(Reply::new(status_text(&st)))
            }
            Command::ListPlugs => {
                let st = self.shared.read().await;
                Ok(Reply::new(plug_list_text(&st)))
            }
            Command::StartPlug { user_id, plug } => self.start_plug(user_id, &plug, now).await,
            Command::StopPlug { user_id, plug } => {
                self.stop_plug(user_id, plug.as_deref()).await
            }
            Command::MyBookings { user_id, target } => {
                let st = self.shared.read().await;
                st.users.get(user_id)?;
                let subject = match &target {
                    Some(key) => {
                        let account = st.users.resolve(key)?;
                        if account.user_id != user_id {
                            self.ensure_admin(user_id)?;
                        }
                        account.user_id
                    }
                    None => user_id,
                };
                let mine = st.calendar.bookings_for(subject);
                if mine.is_empty() {
                    return Ok(Reply::new("no bookings"));
                }
                let lines: Vec<String> = mine
                    .iter()
                    .map(|(day, slot, _)| format!("{day} {slot}"))
                    .collect();
                Ok(Reply::new(lines.join("\n")))
            }
            Command::Calendar => {
                let st = self.shared.read().await;
                if st.calendar.is_empty() {
                    return Ok(Reply::new("no bookings"));
                }
                let lines: Vec<String> = st
                    .calendar
                    .entries()
                    .map(|(day, slot, b)| format!("{day} {slot} @{}", b.username))
                    .collect();
                Ok(Reply::new(lines.join("\n")))
            }
            Command::AddMinutes {
                user_id,
                target,
                minutes,
            } => self.add_minutes(user_id, &target, minutes).await,
            Command::SetDailyMinutes {
                user_id,
                target,
                minutes,
            } => self.set_daily_minutes(user_id, &target, minutes).await,
            Command::HolidayTimer {
                user_id,
                plug,
                minutes,
            } => self.holiday_timer(user_id, &plug, minutes).await,
            Command::Book {
                user_id,
                target,
                weekday,
                slot,
            } => self.book(user_id, &target, &weekday, &slot).await,
            Command::Unbook {
                user_id,
                weekday,
                slot,
            } => self.unbook(user_id, &weekday, &slot).await,
            Command::Activate {
                user_id,
                plug,
                enabled,
            } => self.activate(user_id, &plug, enabled).await,
            Command::PlugPower { user_id, plug, on } => {
                self.plug_power(user_id, &plug, on).await
            }
        }
    }

    async fn register(&self, user_id: UserId, username: &str) -> Result<Reply, HubError> {
        let mut st = self.shared.write().await;
        let account = st
            .users
            .register(user_id, username, self.cfg.default_daily_minutes);
        let text = format!(
            "hello @{}, you have {} minutes today",
            account.username, account.remaining_minutes
        );
        st.record_system(format!("user @{username} ({user_id}) registered"));
        Ok(Reply::new(text))
    }

    /// Start a plug for a user: quota, slot, and kill-switch checks, then
    /// assign and switch on. The assignment sticks even if the switch
    /// command fails, so the next poll meters the right person.
    async fn start_plug(
        &self,
        user_id: UserId,
        plug_name: &str,
        now: NaiveDateTime,
    ) -> Result<Reply, HubError> {
        let (prefix, username) = {
            let mut st = self.shared.write().await;
            let account = st.users.get(user_id)?;
            let username = account.username.clone();
            let remaining = account.remaining_minutes;

            let plug = st.plugs.get(plug_name)?;
            if !plug.enabled {
                return Err(HubError::PlugDisabled(plug_name.to_string()));
            }
            if remaining <= 0 {
                return Err(HubError::QuotaExhausted { username });
            }
            let slot = Slot::containing(now.time());
            if !st.calendar.is_user_allowed(now.weekday(), slot, user_id) {
                let booked_by = st
                    .calendar
                    .booking_at(now.weekday(), slot)
                    .map(|b| b.username.clone())
                    .unwrap_or_default();
                return Err(HubError::SlotNotAllowed { booked_by });
            }

            let prefix = plug.topic_prefix.clone();
            st.plugs.set_assigned_user(plug_name, user_id)?;
            st.record_switch(plug_name, true);
            st.record_quota(format!("{plug_name} started by @{username}"));
            (prefix, username)
        };

        self.switch.set_power(&prefix, true).await?;
        Ok(Reply::new(format!("{plug_name} is on, enjoy @{username}")))
    }

    /// Stop a plug. Allowed for the current user and the admin. Without a
    /// name, the caller's attached plug is stopped. Either way the plug is
    /// handed back to the fallback owner.
    async fn stop_plug(
        &self,
        user_id: UserId,
        plug_name: Option<&str>,
    ) -> Result<Reply, HubError> {
        let (name, prefix) = {
            let mut st = self.shared.write().await;
            let username = st.users.get(user_id)?.username.clone();
            let name = match plug_name {
                Some(n) => n.to_string(),
                None => st
                    .plugs
                    .assigned_to(user_id)
                    .map(|p| p.name.clone())
                    .ok_or_else(|| HubError::NotFound {
                        kind: "plug attached to",
                        id: format!("@{username}"),
                    })?,
            };
            let plug = st.plugs.get(&name)?;
            let owner = plug.assigned_user_id;
            if owner != Some(user_id) && user_id != self.cfg.admin_user_id {
                return Err(HubError::NotAuthorized);
            }
            let prefix = plug.topic_prefix.clone();
            st.plugs
                .set_assigned_user(&name, self.cfg.fallback_user_id)?;
            st.record_switch(&name, false);
            (name, prefix)
        };

        self.switch.set_power(&prefix, false).await?;
        Ok(Reply::new(format!("{name} is off")))
    }

    async fn add_minutes(
        &self,
        caller: UserId,
        target: &str,
        minutes: i64,
    ) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let text = {
            let mut st = self.shared.write().await;
            let account = st.users.resolve(target)?;
            let (id, username) = (account.user_id, account.username.clone());
            let balance = st.users.add_minutes(id, minutes)?;
            let text = format!("@{username} now has {balance} minutes");
            st.record_quota(format!("admin adjusted @{username} by {minutes:+} min"));
            text
        };
        self.notifier.publish(Notice::AdminAction { text: text.clone() });
        Ok(Reply::new(text))
    }

    async fn set_daily_minutes(
        &self,
        caller: UserId,
        target: &str,
        minutes: i64,
    ) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let text = {
            let mut st = self.shared.write().await;
            let account = st.users.resolve(target)?;
            let (id, username) = (account.user_id, account.username.clone());
            st.users.set_daily_minutes(id, minutes)?;
            let text = format!("@{username} gets {minutes} minutes per day from tomorrow");
            st.record_quota(format!("admin set @{username} daily allotment to {minutes}"));
            text
        };
        self.notifier.publish(Notice::AdminAction { text: text.clone() });
        Ok(Reply::new(text))
    }

    async fn holiday_timer(
        &self,
        caller: UserId,
        plug_name: &str,
        minutes: i64,
    ) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let mut st = self.shared.write().await;
        let plug = st.plugs.get_mut(plug_name)?;
        plug.holiday_minutes = minutes.max(0);
        let text = if minutes > 0 {
            format!("{plug_name} is unmetered for the next {minutes} minutes")
        } else {
            format!("{plug_name} holiday timer cleared")
        };
        st.record_system(text.clone());
        drop(st);
        self.notifier.publish(Notice::AdminAction { text: text.clone() });
        Ok(Reply::new(text))
    }

    async fn book(
        &self,
        caller: UserId,
        target: &str,
        weekday: &str,
        slot: &str,
    ) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let day = crate::calendar::parse_weekday(weekday)?;
        let slot: Slot = slot.parse()?;
        let text = {
            let mut st = self.shared.write().await;
            let account = st.users.resolve(target)?;
            let (id, username) = (account.user_id, account.username.clone());
            let displaced = st.calendar.book(day, slot, id, &username, Utc::now())?;
            let text = match displaced {
                Some(old) => format!(
                    "{day} {slot} booked for @{username} (was @{})",
                    old.username
                ),
                None => format!("{day} {slot} booked for @{username}"),
            };
            st.record_system(text.clone());
            text
        };
        self.notifier.publish(Notice::AdminAction { text: text.clone() });
        Ok(Reply::new(text))
    }

    async fn unbook(&self, caller: UserId, weekday: &str, slot: &str) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let day = crate::calendar::parse_weekday(weekday)?;
        let slot: Slot = slot.parse()?;
        let mut st = self.shared.write().await;
        let text = match st.calendar.unbook(day, slot)? {
            Some(old) => format!("{day} {slot} freed (was @{})", old.username),
            None => format!("{day} {slot} was not booked"),
        };
        st.record_system(text.clone());
        Ok(Reply::new(text))
    }

    /// Admin kill-switch. Disabling also cuts power.
    async fn activate(
        &self,
        caller: UserId,
        plug_name: &str,
        enabled: bool,
    ) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let prefix = {
            let mut st = self.shared.write().await;
            st.plugs.set_enabled(plug_name, enabled)?;
            let state_str = if enabled { "enabled" } else { "disabled" };
            st.record_system(format!("{plug_name} {state_str} by admin"));
            if enabled {
                None
            } else {
                Some(st.plugs.get(plug_name)?.topic_prefix.clone())
            }
        };
        if let Some(prefix) = prefix {
            self.switch.set_power(&prefix, false).await?;
        }
        let text = if enabled {
            format!("{plug_name} enabled")
        } else {
            format!("{plug_name} disabled and switched off")
        };
        self.notifier.publish(Notice::AdminAction { text: text.clone() });
        Ok(Reply::new(text))
    }

    /// Raw relay control, bypassing quota and calendar checks.
    async fn plug_power(
        &self,
        caller: UserId,
        plug_name: &str,
        on: bool,
    ) -> Result<Reply, HubError> {
        self.ensure_admin(caller)?;
        let prefix = {
            let mut st = self.shared.write().await;
            let plug = st.plugs.get(plug_name)?;
            let prefix = plug.topic_prefix.clone();
            st.record_switch(plug_name, on);
            prefix
        };
        self.switch.set_power(&prefix, on).await?;
        let state_str = if on { "on" } else { "off" };
        Ok(Reply::new(format!("{plug_name} switched {state_str}")))
    }

    fn ensure_admin(&self, user_id: UserId) -> Result<(), HubError> {
        if user_id == self.cfg.admin_user_id {
            Ok(())
        } else {
            Err(HubError::NotAuthorized)
        }
    }

    // -----------------------------------------------------------------------
    // Deferred switch execution
    // -----------------------------------------------------------------------

    async fn execute(&self, actions: Vec<SwitchAction>) {
        for action in actions {
            if let Err(e) = self.switch.set_power(&action.topic_prefix, action.on).await {
                warn!(plug = %action.plug_name, "switch command failed: {e}");
                let mut st = self.shared.write().await;
                st.record_error(format!("{}: switch command failed: {e}", action.plug_name));
            } else {
                let mut st = self.shared.write().await;
                st.record_switch(&action.plug_name, action.on);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Phase classification
// ---------------------------------------------------------------------------

fn classify(plug: &crate::plugs::PlugState, rounds: u64, cfg: &EngineConfig) -> Phase {
    match plug.last_seen_at {
        None => {
            if rounds >= STARTUP_GRACE_ROUNDS {
                return Phase::Error;
            }
            Phase::Idle
        }
        Some(seen) => {
            let age = Utc::now().signed_duration_since(seen).num_seconds();
            if age > cfg.offline_after_secs {
                return Phase::Error;
            }
            let watts = plug.last_power_watts.unwrap_or(0.0);
            if watts > cfg.power_threshold_watts {
                Phase::Active
            } else if plug.is_on {
                Phase::StandbyOn
            } else {
                Phase::Idle
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Report formatting
// ---------------------------------------------------------------------------

fn status_text(st: &SystemState) -> String {
    let mut lines = Vec::new();
    lines.push(format!("screen time for {}", st.last_reset_date));
    for account in st.users.iter() {
        lines.push(format!(
            "  @{}: {} left, {} used{}",
            account.username,
            account.remaining_minutes,
            account.used_minutes,
            if account.error_minutes > 0 {
                format!(", {} error", account.error_minutes)
            } else {
                String::new()
            }
        ));
    }
    for plug in st.plugs.iter() {
        let power = plug
            .last_power_watts
            .map(|w| format!("{w:.0} W"))
            .unwrap_or_else(|| "no data".to_string());
        let mut flags = Vec::new();
        if !plug.enabled {
            flags.push("disabled".to_string());
        }
        if plug.in_error {
            flags.push("unreachable".to_string());
        }
        if plug.holiday_minutes > 0 {
            flags.push(format!("holiday {} min", plug.holiday_minutes));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        lines.push(format!(
            "  {}: {} ({power}){flags}",
            plug.name,
            if plug.is_on { "on" } else { "off" },
        ));
    }
    lines.join("\n")
}

fn daily_report_text(st: &SystemState) -> String {
    let mut lines = Vec::new();
    lines.push(format!("daily report for {}", st.last_reset_date));
    for account in st.users.iter() {
        lines.push(format!(
            "  @{}: used {} of {} min{}",
            account.username,
            account.used_minutes,
            account.default_minutes,
            if account.error_minutes > 0 {
                format!(" (+{} error)", account.error_minutes)
            } else {
                String::new()
            }
        ));
    }
    lines.join("\n")
}

const HELP_TEXT: &str = "\
commands:
  register            create your account
  status              budgets and plug states
  list_plugs          plugs and who is using them
  start_plug          switch a plug on for yourself
  stop_plug           switch it off again
  my_bookings         your weekly slots
  calendar            every booked slot
admin:
  add_minutes         adjust today's balance (may be negative)
  set_daily_minutes   change a daily allotment
  holiday_timer       unmetered time for a plug
  book / unbook       manage the weekly calendar
  activate            plug kill-switch
  plug_power          raw relay control";

fn plug_list_text(st: &SystemState) -> String {
    if st.plugs.is_empty() {
        return "no plugs configured".to_string();
    }
    let mut lines = Vec::new();
    for plug in st.plugs.iter() {
        let user = plug
            .assigned_user_id
            .and_then(|id| st.users.get(id).ok())
            .map(|a| format!("@{}", a.username))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{}: {} -> {user}",
            plug.name,
            if plug.is_on { "on" } else { "off" }
        ));
    }
    lines.join("\n")
}

// ===========================================================================
// Tests
// ===========================================================================
