//! Household notices fanned out over a broadcast channel.
//!
//! The engine publishes; whoever cares (the log forwarder in `main`, a
//! future chat frontend) subscribes. Publishing never blocks and never
//! fails: with no receivers the notice is simply dropped.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// Periodic or startup status summary, preformatted.
    StatusReport { text: String },
    /// A plug was switched off because its user ran out of minutes.
    QuotaExhausted { username: String, plug: String },
    /// A plug was switched off because the slot belongs to someone else.
    SlotDenied {
        username: String,
        plug: String,
        booked_by: String,
    },
    /// A plug went unreachable; the minutes land on the fallback owner.
    ErrorMinutesAccrued {
        plug: String,
        username: String,
        minutes: i64,
    },
    /// A user is about to run out (fires once around the warning mark).
    LowMinutes { username: String, remaining: i64 },
    /// Midnight reset summary for the finished day, preformatted.
    DailyReport { text: String },
    /// An admin command changed state (adjustments, kill-switch, bookings).
    AdminAction { text: String },
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Best-effort send. A send error only means nobody is listening.
    pub fn publish(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
