//! Per-identity call records and their wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors converting a [`CallRecord`] to or from its stored payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed call record payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("call record has a call count of zero")]
    ZeroCount,
}

/// The state kept for one identity.
///
/// Stored as a JSON object with exactly two fields, `last_call_at` (RFC 3339)
/// and `call_count`. Unknown fields are ignored when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// When the current window was opened
    pub last_call_at: DateTime<Utc>,
    /// Calls accepted in the current window, including the opening one
    pub call_count: u64,
}

impl CallRecord {
    /// The record for a call that opens a new window.
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            last_call_at: now,
            call_count: 1,
        }
    }

    /// The record after one more accepted call in the same window.
    pub fn incremented(&self) -> Self {
        Self {
            last_call_at: self.last_call_at,
            call_count: self.call_count.saturating_add(1),
        }
    }

    /// Whether `now` lies strictly after the end of this record's window.
    pub fn window_elapsed(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.last_call_at.checked_add_signed(window) {
            Some(expires_at) => now > expires_at,
            // The window extends beyond any representable instant.
            None => false,
        }
    }

    pub fn encode(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, PayloadError> {
        let record: CallRecord = serde_json::from_str(payload)?;
        if record.call_count == 0 {
            return Err(PayloadError::ZeroCount);
        }
        Ok(record)
    }
}
