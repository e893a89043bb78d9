//! # Event Kinds
//!
//! Dot-namespaced event kinds. Every domain the mesh knows about has a typed
//! variant; anything else is carried verbatim in [`EventKind::Custom`] so
//! that wormhole filters keep matching on the raw string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of event carried by an envelope.
///
/// Serialises as its canonical dotted string (`"Security.ThreatDetected"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventKind {
    // =========================================================================
    // SHIELD
    // =========================================================================
    /// Threat detection and shield lifecycle.
    Security(SecurityKind),

    // =========================================================================
    // ECONOMIC
    // =========================================================================
    /// Treasury movements and balances.
    Treasury(TreasuryKind),

    // =========================================================================
    // AUDIT
    // =========================================================================
    /// Audit trail entries.
    Audit(AuditKind),

    // =========================================================================
    // SYSTEM
    // =========================================================================
    /// Bus-level and process-level events.
    System(SystemKind),

    /// Any kind without a typed variant, kept verbatim.
    Custom(String),
}

/// Shield events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityKind {
    ThreatDetected,
    ThreatNeutralized,
    ShieldRotated,
}

/// Economic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreasuryKind {
    Move,
    BalanceChanged,
}

/// Audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditKind {
    EntryRecorded,
    AnomalyFlagged,
}

/// System events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    Error,
    Warning,
    Info,
    Heartbeat,
}

impl EventKind {
    /// Parse a dotted kind string.
    ///
    /// Unknown strings become [`EventKind::Custom`]; parsing never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Security.ThreatDetected" => Self::Security(SecurityKind::ThreatDetected),
            "Security.ThreatNeutralized" => Self::Security(SecurityKind::ThreatNeutralized),
            "Security.ShieldRotated" => Self::Security(SecurityKind::ShieldRotated),
            "Treasury.Move" => Self::Treasury(TreasuryKind::Move),
            "Treasury.BalanceChanged" => Self::Treasury(TreasuryKind::BalanceChanged),
            "Audit.EntryRecorded" => Self::Audit(AuditKind::EntryRecorded),
            "Audit.AnomalyFlagged" => Self::Audit(AuditKind::AnomalyFlagged),
            "System.Error" => Self::System(SystemKind::Error),
            "System.Warning" => Self::System(SystemKind::Warning),
            "System.Info" => Self::System(SystemKind::Info),
            "System.Heartbeat" => Self::System(SystemKind::Heartbeat),
            other => Self::Custom(other.to_string()),
        }
    }

    /// Canonical dotted representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Security(k) => match k {
                SecurityKind::ThreatDetected => "Security.ThreatDetected",
                SecurityKind::ThreatNeutralized => "Security.ThreatNeutralized",
                SecurityKind::ShieldRotated => "Security.ShieldRotated",
            },
            Self::Treasury(k) => match k {
                TreasuryKind::Move => "Treasury.Move",
                TreasuryKind::BalanceChanged => "Treasury.BalanceChanged",
            },
            Self::Audit(k) => match k {
                AuditKind::EntryRecorded => "Audit.EntryRecorded",
                AuditKind::AnomalyFlagged => "Audit.AnomalyFlagged",
            },
            Self::System(k) => match k {
                SystemKind::Error => "System.Error",
                SystemKind::Warning => "System.Warning",
                SystemKind::Info => "System.Info",
                SystemKind::Heartbeat => "System.Heartbeat",
            },
            Self::Custom(raw) => raw,
        }
    }

    /// Text before the first `.`, or the whole kind when it has no namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        let raw = self.as_str();
        raw.split_once('.').map_or(raw, |(ns, _)| ns)
    }

    /// Whether this kind reports a failure.
    ///
    /// True for `System.Error` and for any kind whose last segment ends in
    /// `Error` or `Failed`.
    #[must_use]
    pub fn is_error(&self) -> bool {
        if matches!(self, Self::System(SystemKind::Error)) {
            return true;
        }
        let last = self.as_str().rsplit('.').next().unwrap_or_default();
        last.ends_with("Error") || last.ends_with("Failed")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Custom(raw) => raw,
            typed => typed.as_str().to_string(),
        }
    }
}
