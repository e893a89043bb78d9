//! # Backpressure Analyzer
//!
//! Sliding window over recently delivered envelopes, bounded by count and by
//! age, reduced to a single "temperature" in `[0, 1]`.
//!
//! ## Temperature
//!
//! ```text
//! temperature = w_rate     * min(arrival_rate / rate_reference, 1)
//!             + w_priority * (mean_priority - min) / (max - min)
//!             + w_entropy  * entropy / log2(distinct kinds)
//! ```
//!
//! Entropy is Shannon entropy (bits) over the kind distribution.

use std::collections::{HashMap, VecDeque};

use manifold_types::{now_millis, Envelope};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::BusConfig;

/// Point-in-time reading of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerSnapshot {
    pub window_len: usize,
    /// Envelopes per second across the window span (at least one second).
    pub arrival_rate: f64,
    pub mean_priority: f64,
    /// Bits.
    pub entropy: f64,
    /// `entropy / log2(distinct kinds)`, 0 for fewer than two kinds.
    pub normalized_entropy: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
struct Sample {
    at: u64,
    kind: String,
    priority: u8,
}

impl Sample {
    fn of(envelope: &Envelope, at: u64) -> Self {
        Self {
            at,
            kind: envelope.kind.as_str().to_string(),
            priority: envelope.priority.value(),
        }
    }
}

/// Sliding-window observer feeding the temperature.
pub struct BackpressureAnalyzer {
    window: RwLock<VecDeque<Sample>>,
    max_len: usize,
    max_age_ms: u64,
    rate_reference: f64,
    weights: (f64, f64, f64),
    priority_range: (u8, u8),
}

impl BackpressureAnalyzer {
    #[must_use]
    pub fn new(config: &BusConfig) -> Self {
        Self {
            window: RwLock::new(VecDeque::with_capacity(config.window_size)),
            max_len: config.window_size.max(1),
            max_age_ms: config.window_secs.saturating_mul(1000),
            rate_reference: config.rate_reference,
            weights: (
                config.weight_rate,
                config.weight_priority,
                config.weight_entropy,
            ),
            priority_range: (config.priority_min, config.priority_max),
        }
    }

    /// Add an envelope to the window.
    pub fn observe(&self, envelope: &Envelope) {
        self.observe_at(envelope, now_millis());
    }

    pub(crate) fn observe_at(&self, envelope: &Envelope, now: u64) {
        let mut window = self.window.write();
        window.push_back(Sample::of(envelope, now));
        while window.len() > self.max_len {
            window.pop_front();
        }
        Self::trim_stale(&mut window, now, self.max_age_ms);
    }

    /// Current snapshot. With an envelope, the reading includes it as if it
    /// had just arrived; the window itself is not modified.
    #[must_use]
    pub fn analyze(&self, envelope: Option<&Envelope>) -> AnalyzerSnapshot {
        self.analyze_at(envelope, now_millis())
    }

    pub(crate) fn analyze_at(&self, envelope: Option<&Envelope>, now: u64) -> AnalyzerSnapshot {
        let window = self.window.read();
        let cutoff = now.saturating_sub(self.max_age_ms);
        let live = window.iter().filter(|s| s.at >= cutoff);

        let extra = envelope.map(|e| Sample::of(e, now));
        match &extra {
            Some(sample) => {
                // Keep the count bound: the hypothetical sample displaces the
                // oldest live one. Stale samples may still sit in the window.
                let live_len = live.clone().count();
                let skip = live_len.saturating_add(1).saturating_sub(self.max_len);
                self.compute(live.skip(skip).chain(std::iter::once(sample)))
            }
            None => self.compute(live),
        }
    }

    /// Drop samples older than the age bound. Returns how many were removed.
    pub fn prune(&self, now: u64) -> usize {
        let mut window = self.window.write();
        let before = window.len();
        Self::trim_stale(&mut window, now, self.max_age_ms);
        before - window.len()
    }

    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.read().len()
    }

    fn trim_stale(window: &mut VecDeque<Sample>, now: u64, max_age_ms: u64) {
        let cutoff = now.saturating_sub(max_age_ms);
        while window.front().is_some_and(|s| s.at < cutoff) {
            window.pop_front();
        }
    }

    fn compute<'a>(&self, samples: impl Iterator<Item = &'a Sample>) -> AnalyzerSnapshot {
        let mut len = 0usize;
        let mut priority_sum = 0u64;
        let mut oldest = u64::MAX;
        let mut newest = 0u64;
        let mut kinds: HashMap<&str, usize> = HashMap::new();

        for sample in samples {
            len += 1;
            priority_sum += u64::from(sample.priority);
            oldest = oldest.min(sample.at);
            newest = newest.max(sample.at);
            *kinds.entry(sample.kind.as_str()).or_default() += 1;
        }

        if len == 0 {
            return AnalyzerSnapshot::default();
        }

        let span_secs = ((newest - oldest) as f64 / 1000.0).max(1.0);
        let arrival_rate = len as f64 / span_secs;
        let mean_priority = priority_sum as f64 / len as f64;

        let entropy = kinds
            .values()
            .map(|&count| {
                let p = count as f64 / len as f64;
                -p * p.log2()
            })
            .sum::<f64>();
        let normalized_entropy = if kinds.len() > 1 {
            (entropy / (kinds.len() as f64).log2()).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let (min, max) = self.priority_range;
        let priority_term = if max > min {
            ((mean_priority - f64::from(min)) / f64::from(max - min)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let rate_term = (arrival_rate / self.rate_reference).min(1.0);

        let (w_rate, w_priority, w_entropy) = self.weights;
        let temperature = (w_rate * rate_term
            + w_priority * priority_term
            + w_entropy * normalized_entropy)
            .clamp(0.0, 1.0);

        AnalyzerSnapshot {
            window_len: len,
            arrival_rate,
            mean_priority,
            entropy,
            normalized_entropy,
            temperature,
        }
    }
}
