//! Human-pacing jitter for browser sessions.
//!
//! Job boards rate-limit and fingerprint clients that act at machine speed.
//! Every session pauses for a uniformly random duration around navigation,
//! between pages, and every few processed items. The windows are tunable
//! per source and a zero-width window disables the pause entirely.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use jobscout_core::pacing::JitterRange;
//!
//! let range = JitterRange::new(1_000, 3_000);
//! let d = range.sample();
//! assert!(d >= Duration::from_millis(1_000) && d <= Duration::from_millis(3_000));
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive window `[min_ms, max_ms]` for a random pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterRange {
    /// A window that never sleeps.
    pub const ZERO: JitterRange = JitterRange {
        min_ms: 0,
        max_ms: 0,
    };

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn is_zero(&self) -> bool {
        self.max_ms == 0
    }

    pub fn is_ordered(&self) -> bool {
        self.min_ms <= self.max_ms
    }

    /// Draw one pause duration uniformly from the window.
    ///
    /// An inverted window collapses to `min_ms`.
    pub fn sample(&self) -> Duration {
        if self.is_zero() {
            return Duration::ZERO;
        }
        if self.min_ms >= self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Pacing policy for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Pause before and after the initial navigation.
    pub navigation: JitterRange,
    /// Pause taken every `item_interval` processed items.
    pub item: JitterRange,
    pub item_interval: usize,
    /// Pause after following a next-page control.
    pub page: JitterRange,
    /// Backoff while waiting for a bot-check page to clear.
    pub challenge_backoff: JitterRange,
}

impl PacingConfig {
    /// No pauses at all. Useful for tests and local fixtures.
    pub fn disabled() -> Self {
        Self {
            navigation: JitterRange::ZERO,
            item: JitterRange::ZERO,
            item_interval: 5,
            page: JitterRange::ZERO,
            challenge_backoff: JitterRange::ZERO,
        }
    }

    /// Whether a pause is due before processing the item at `index`.
    pub fn item_pause_due(&self, index: usize) -> bool {
        self.item_interval > 0 && index > 0 && index % self.item_interval == 0
    }

    pub(crate) fn ranges(&self) -> [(&'static str, JitterRange); 4] {
        [
            ("navigation", self.navigation),
            ("item", self.item),
            ("page", self.page),
            ("challenge_backoff", self.challenge_backoff),
        ]
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            navigation: JitterRange::new(2_000, 5_000),
            item: JitterRange::new(1_000, 3_000),
            item_interval: 5,
            page: JitterRange::new(3_000, 6_000),
            challenge_backoff: JitterRange::new(3_000, 8_000),
        }
    }
}
