//! JSON snapshot persistence.
//!
//! The in-memory state is authoritative; the snapshot exists so budgets and
//! bookings survive a restart. Writes go to a sibling `.tmp` file first and
//! are renamed into place, so a crash mid-write leaves the previous snapshot
//! intact. A failed save is logged and retried on the next cycle.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::quota::{UserAccount, UserId};
use crate::state::SystemState;

// ---------------------------------------------------------------------------
// Snapshot format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_reset_date: NaiveDate,
    pub users: Vec<UserAccount>,
    pub bookings: Vec<BookingRecord>,
}

/// Bookings are stored flat with string weekday/slot, which keeps the JSON
/// readable and hand-editable.
#[derive(Debug, Serialize, Deserialize)]
pub struct BookingRecord {
    pub weekday: String,
    pub slot: String,
    pub user_id: UserId,
    pub username: String,
    pub booked_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(state: &SystemState) -> Self {
        Self {
            last_reset_date: state.last_reset_date,
            users: state.users.iter().cloned().collect(),
            bookings: state
                .calendar
                .entries()
                .map(|(day, slot, booking)| BookingRecord {
                    weekday: day.to_string(),
                    slot: slot.to_string(),
                    user_id: booking.user_id,
                    username: booking.username.clone(),
                    booked_at: booking.booked_at,
                })
                .collect(),
        }
    }

    /// Replay the snapshot into a freshly constructed state. Records that no
    /// longer parse (edited by hand, window changed) are skipped with a
    /// warning rather than failing startup.
    pub fn apply(self, state: &mut SystemState) {
        state.last_reset_date = self.last_reset_date;
        for account in self.users {
            state.users.insert(account);
        }
        for record in self.bookings {
            let parsed = crate::calendar::parse_weekday(&record.weekday)
                .and_then(|day| Ok((day, record.slot.parse()?)));
            match parsed {
                Ok((day, slot)) => {
                    if let Err(e) = state.calendar.book(
                        day,
                        slot,
                        record.user_id,
                        &record.username,
                        record.booked_at,
                    ) {
                        tracing::warn!(
                            "snapshot booking {} {} dropped: {e}",
                            record.weekday,
                            record.slot
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "snapshot booking {} {} unparseable: {e}",
                        record.weekday,
                        record.slot
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Write the snapshot atomically: serialize to `<path>.tmp`, then rename.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), HubError> {
    let json = serde_json::to_vec_pretty(snapshot).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a snapshot if the file exists. A missing file is a normal first run.
pub fn load(path: &Path) -> anyhow::Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let snapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse state file {}", path.display()))?;
    Ok(Some(snapshot))
}

// ===========================================================================
// Tests
// ===========================================================================
