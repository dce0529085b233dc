//! Progress events emitted by long-running operations.

use serde::{Deserialize, Serialize};

/// Lifecycle state carried by an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// The named operation has begun.
    Started,
    /// The named operation finished successfully.
    Success,
    /// The named operation failed.
    Failure,
}

/// Ephemeral progress signal. Never persisted.
///
/// For a given `text`, a `Started` event always precedes the matching
/// `Success` or `Failure`. No ordering holds across different texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Human readable name of the operation (e.g. `Pulling base image (arm64)`).
    pub text: String,
    /// Where the operation is in its lifecycle.
    pub status: EventStatus,
}

impl Event {
    /// Build a `Started` event.
    pub fn started(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: EventStatus::Started,
        }
    }

    /// Build a `Success` event.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: EventStatus::Success,
        }
    }

    /// Build a `Failure` event.
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: EventStatus::Failure,
        }
    }
}
