//! Retry delay schedule

use std::time::Duration;

/// Default retry delays: seconds, tens of seconds, minutes, tens of minutes.
pub const DEFAULT_BACKOFF_SECS: [u64; 5] = [5, 30, 120, 600, 1800];

/// Non-decreasing list of retry delays indexed by consecutive failures.
///
/// The last entry is the ceiling for every level beyond the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// Build a schedule from arbitrary delays.
    ///
    /// Each entry is raised to at least its predecessor. An empty list
    /// yields the default schedule.
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        let mut normalized: Vec<Duration> = Vec::new();
        for delay in delays {
            let floor = normalized.last().copied().unwrap_or(Duration::ZERO);
            normalized.push(delay.max(floor));
        }
        if normalized.is_empty() {
            return Self::default();
        }
        Self { delays: normalized }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().map(|s| Duration::from_secs(*s)))
    }

    /// Delay for a pass that failed at `level`.
    pub fn delay_for(&self, level: u32) -> Duration {
        let index = (level as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    pub fn first(&self) -> Duration {
        self.delays[0]
    }

    pub fn ceiling(&self) -> Duration {
        self.delays[self.delays.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}
