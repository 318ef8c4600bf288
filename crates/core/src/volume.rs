//! Sliding-window trade volume.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::Duration;

/// Default look-back of the volume window (24h).
pub const DEFAULT_VOLUME_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// One trade's USD notional at its block time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSample {
    pub notional_usd: Decimal,
    pub timestamp: u64,
}

/// Trade notionals inside a trailing time window, with an exact running sum.
///
/// Samples are pushed in non-decreasing timestamp order and evicted only by
/// [`VolumeWindow::refresh`].
#[derive(Debug, Clone)]
pub struct VolumeWindow {
    samples: VecDeque<VolumeSample>,
    total: Decimal,
    window_secs: u64,
}

impl Default for VolumeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_WINDOW)
    }
}

impl VolumeWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            total: Decimal::ZERO,
            window_secs: window.as_secs(),
        }
    }

    pub fn push(&mut self, sample: VolumeSample) {
        self.total += sample.notional_usd;
        self.samples.push_back(sample);
    }

    /// Evict samples older than `now - window` and return the retained total.
    pub fn refresh(&mut self, now: u64) -> Decimal {
        let cutoff = now.saturating_sub(self.window_secs);
        while let Some(front) = self.samples.front() {
            if front.timestamp >= cutoff {
                break;
            }
            self.total -= front.notional_usd;
            self.samples.pop_front();
        }
        self.total
    }

    /// Sum of retained samples.
    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &VolumeSample> {
        self.samples.iter()
    }
}
