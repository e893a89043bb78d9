//! # Channels
//!
//! Metadata for a named logical topic. Subscriber lists live in the bus
//! registry, not here.

use serde::{Deserialize, Serialize};

use crate::ids::ChannelId;

/// Flow direction of a channel relative to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Events arrive from outside the process.
    In,
    /// Events leave the process.
    Out,
    /// Both.
    #[default]
    Bidirectional,
}

/// A named topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub label: String,
    pub direction: Direction,
}

impl Channel {
    /// Create a bidirectional channel whose label equals its id.
    pub fn new(id: impl Into<ChannelId>) -> Self {
        let id = id.into();
        Self {
            label: id.to_string(),
            id,
            direction: Direction::Bidirectional,
        }
    }

    /// Set the human-readable label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let channel = Channel::new("AUDIT_LOG");
        assert_eq!(channel.label, "AUDIT_LOG");
        assert_eq!(channel.direction, Direction::Bidirectional);

        let channel = channel.with_label("Audit trail").with_direction(Direction::In);
        assert_eq!(channel.label, "Audit trail");
        assert_eq!(channel.direction, Direction::In);
    }
}
