//! Weekly booking calendar: 30-minute slots per weekday.
//!
//! Bookings recur weekly and are never auto-expired. Each slot holds at
//! most one booking; an unbooked slot is open to any user.

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::HubError;
use crate::quota::UserId;

pub const SLOT_MINUTES: u16 = 30;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// A time-of-day on the 30-minute grid, stored as minutes since midnight.
/// `24:00` is only valid as an exclusive window end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    minutes: u16,
}

impl Slot {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes <= 24 * 60 && minutes % SLOT_MINUTES == 0 {
            Some(Self { minutes })
        } else {
            None
        }
    }

    /// The slot containing `time` (floored to the grid).
    pub fn containing(time: NaiveTime) -> Self {
        let total = (time.hour() * 60 + time.minute()) as u16;
        Self {
            minutes: total - total % SLOT_MINUTES,
        }
    }

    pub fn minutes(self) -> u16 {
        self.minutes
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl FromStr for Slot {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HubError::InvalidSlot(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        let h: u16 = h.trim().parse().map_err(|_| invalid())?;
        let m: u16 = m.trim().parse().map_err(|_| invalid())?;
        if m >= 60 {
            return Err(invalid());
        }
        Slot::from_minutes(h * 60 + m).ok_or_else(invalid)
    }
}

/// Parse a weekday name ("Mon", "monday", ...).
pub fn parse_weekday(s: &str) -> Result<Weekday, HubError> {
    s.parse::<Weekday>()
        .map_err(|_| HubError::InvalidSlot(s.to_string()))
}

// ---------------------------------------------------------------------------
// Bookings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub user_id: UserId,
    pub username: String,
    pub booked_at: DateTime<Utc>,
}

/// Map key: (days since Monday, minutes since midnight). Keeps iteration
/// ordered Mon..Sun, morning..night.
type SlotKey = (u8, u16);

fn key(weekday: Weekday, slot: Slot) -> SlotKey {
    (weekday.num_days_from_monday() as u8, slot.minutes())
}

#[derive(Debug)]
pub struct BookingCalendar {
    /// Earliest bookable slot (inclusive).
    window_start: Slot,
    /// End of the bookable day (exclusive), typically 24:00.
    window_end: Slot,
    bookings: BTreeMap<SlotKey, Booking>,
}

impl BookingCalendar {
    pub fn new(window_start: Slot, window_end: Slot) -> Self {
        Self {
            window_start,
            window_end,
            bookings: BTreeMap::new(),
        }
    }

    fn check_window(&self, slot: Slot) -> Result<(), HubError> {
        if slot < self.window_start || slot >= self.window_end {
            return Err(HubError::InvalidSlot(slot.to_string()));
        }
        Ok(())
    }

    /// Book a slot, overwriting any existing booking. Returns the booking
    /// that was displaced, if any.
    pub fn book(
        &mut self,
        weekday: Weekday,
        slot: Slot,
        user_id: UserId,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, HubError> {
        self.check_window(slot)?;
        Ok(self.bookings.insert(
            key(weekday, slot),
            Booking {
                user_id,
                username: username.to_string(),
                booked_at: now,
            },
        ))
    }

    pub fn unbook(&mut self, weekday: Weekday, slot: Slot) -> Result<Option<Booking>, HubError> {
        self.check_window(slot)?;
        Ok(self.bookings.remove(&key(weekday, slot)))
    }

    pub fn booking_at(&self, weekday: Weekday, slot: Slot) -> Option<&Booking> {
        self.bookings.get(&key(weekday, slot))
    }

    /// True if the slot is unbooked or booked to this user.
    pub fn is_user_allowed(&self, weekday: Weekday, slot: Slot, user_id: UserId) -> bool {
        match self.booking_at(weekday, slot) {
            None => true,
            Some(b) => b.user_id == user_id,
        }
    }

    pub fn bookings_for(&self, user_id: UserId) -> Vec<(Weekday, Slot, &Booking)> {
        self.entries()
            .filter(|(_, _, b)| b.user_id == user_id)
            .collect()
    }

    /// All bookings, ordered Mon..Sun then by time.
    pub fn entries(&self) -> impl Iterator<Item = (Weekday, Slot, &Booking)> {
        self.bookings.iter().map(|(&(day, minutes), booking)| {
            let weekday = match day {
                0 => Weekday::Mon,
                1 => Weekday::Tue,
                2 => Weekday::Wed,
                3 => Weekday::Thu,
                4 => Weekday::Fri,
                5 => Weekday::Sat,
                _ => Weekday::Sun,
            };
            (weekday, Slot { minutes }, booking)
        })
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
