//! Data-driven wormhole filters.
//!
//! Filters are plain data so they can be persisted with the wormhole and
//! edited at runtime. Kind matching works on the canonical string form,
//! which keeps custom kinds (`THREAT_DETECTED`) and typed kinds
//! (`Security.ThreatDetected`) equally addressable.

use manifold_types::Envelope;
use serde::{Deserialize, Serialize};

/// Predicate over an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum WormholeFilter {
    /// Matches everything.
    #[default]
    All,
    /// Exact kind string.
    KindEquals(String),
    /// Kind glob where `*` matches any run of characters, e.g. `Security.*`.
    KindGlob(String),
    /// Kind namespace (text before the first `.`).
    Namespace(String),
    /// Priority at or above the given value.
    MinPriority(u8),
    /// Exact source.
    Source(String),
    AllOf(Vec<WormholeFilter>),
    AnyOf(Vec<WormholeFilter>),
    Not(Box<WormholeFilter>),
}

impl WormholeFilter {
    /// Evaluate against an envelope.
    #[must_use]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Self::All => true,
            Self::KindEquals(kind) => envelope.kind.as_str() == kind.as_str(),
            Self::KindGlob(pattern) => glob_match(pattern, envelope.kind.as_str()),
            Self::Namespace(ns) => envelope.kind.namespace() == ns.as_str(),
            Self::MinPriority(min) => envelope.priority.value() >= *min,
            Self::Source(source) => envelope.source == *source,
            Self::AllOf(filters) => filters.iter().all(|f| f.matches(envelope)),
            Self::AnyOf(filters) => filters.iter().any(|f| f.matches(envelope)),
            Self::Not(inner) => !inner.matches(envelope),
        }
    }
}

/// `*`-only glob, iterative with single-star backtracking.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            resume = ti;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}
