//! Typed errors surfaced through the command API.
//!
//! Everything here is recoverable: commands are rejected with one of these
//! kinds and the caller renders them. Only configuration errors at startup
//! (handled with `anyhow` in `main`) are fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Unknown user/plug/slot id. No state change.
    #[error("unknown {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// Start denied: the user's daily budget is used up.
    #[error("@{username} has no minutes left today")]
    QuotaExhausted { username: String },

    /// Start denied: the current slot is booked to someone else.
    #[error("this slot is booked for @{booked_by}")]
    SlotNotAllowed { booked_by: String },

    /// Malformed weekday or time-of-day.
    #[error("invalid slot '{0}': expected HH:MM on the 30-minute grid inside the booking window")]
    InvalidSlot(String),

    /// Plug command or poll timed out. Recovered locally by the engine
    /// (error state + error minutes), surfaced to commands as a rejection.
    #[error("plug '{0}' is not responding")]
    PlugUnreachable(String),

    /// Admin kill-switch is off for this plug.
    #[error("plug '{0}' is disabled")]
    PlugDisabled(String),

    /// Caller is not the admin (or, for stop, not the plug's current user).
    #[error("you are not allowed to do that")]
    NotAuthorized,

    /// State snapshot write failed. Logged and retried on the next
    /// mutation cycle; in-memory state stays authoritative.
    #[error("failed to persist state: {0}")]
    Persistence(#[from] std::io::Error),
}

impl HubError {
    pub fn unknown_user(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "user",
            id: id.to_string(),
        }
    }

    pub fn unknown_plug(name: impl ToString) -> Self {
        Self::NotFound {
            kind: "plug",
            id: name.to_string(),
        }
    }

    /// Stable machine-readable kind, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::SlotNotAllowed { .. } => "slot_not_allowed",
            Self::InvalidSlot(_) => "invalid_slot",
            Self::PlugUnreachable(_) => "plug_unreachable",
            Self::PlugDisabled(_) => "plug_disabled",
            Self::NotAuthorized => "not_authorized",
            Self::Persistence(_) => "persistence",
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_mentions_kind_and_id() {
        let err = HubError::unknown_plug("tv");
        assert_eq!(err.to_string(), "unknown plug 'tv'");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn quota_exhausted_mentions_user() {
        let err = HubError::QuotaExhausted {
            username: "alice".into(),
        };
        assert!(err.to_string().contains("@alice"));
        assert_eq!(err.kind(), "quota_exhausted");
    }

    #[test]
    fn persistence_wraps_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = HubError::from(io);
        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().contains("denied"));
    }
}
