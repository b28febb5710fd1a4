use core::fmt;

/// Number of probe distances tracked individually. Longer probes are only
/// counted in aggregate.
pub const PROBE_STATS_SIZE: usize = 64;

/// Histogram of probe distances of the live entries in a table.
///
/// Distances below [`PROBE_STATS_SIZE`] each get a bin; anything longer is
/// counted by [`large_probes`](ProbeStats::large_probes). The bins always sum
/// to the table's live count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStats {
    counts: [u64; PROBE_STATS_SIZE],
    large: u64,
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self {
            counts: [0; PROBE_STATS_SIZE],
            large: 0,
        }
    }
}

impl ProbeStats {
    pub(crate) fn record(&mut self, distance: u32) {
        match self.counts.get_mut(distance as usize) {
            Some(count) => *count += 1,
            None => {
                log::warn!("Large probe: {distance}");
                self.large += 1;
            }
        }
    }

    pub(crate) fn forget(&mut self, distance: u32) {
        let count = match self.counts.get_mut(distance as usize) {
            Some(count) => count,
            None => &mut self.large,
        };
        debug_assert!(*count > 0, "no entry recorded at probe distance {distance}");
        *count = count.saturating_sub(1);
    }

    /// Number of live entries found `distance` probes away from home.
    ///
    /// Returns 0 for distances beyond the tracked range.
    pub fn count(&self, distance: u32) -> u64 {
        self.counts.get(distance as usize).copied().unwrap_or(0)
    }

    /// Number of live entries whose probe distance is at least
    /// [`PROBE_STATS_SIZE`].
    pub fn large_probes(&self) -> u64 {
        self.large
    }

    /// Total number of entries counted, including large probes.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.large
    }

    /// Non-empty `(distance, count)` bins in ascending distance order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(distance, count)| (distance as u32, *count))
    }
}

impl fmt::Display for ProbeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (distance, count) in self.iter() {
            writeln!(f, "probe {distance:02}: {count}")?;
        }
        if self.large > 0 {
            writeln!(f, "probe {PROBE_STATS_SIZE}+: {}", self.large)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn records_and_forgets() {
        let mut stats = ProbeStats::default();
        stats.record(0);
        stats.record(0);
        stats.record(3);
        stats.record(PROBE_STATS_SIZE as u32 + 10);

        assert_eq!(stats.count(0), 2);
        assert_eq!(stats.count(3), 1);
        assert_eq!(stats.large_probes(), 1);
        assert_eq!(stats.total(), 4);
        assert_eq!(stats.iter().collect::<Vec<_>>(), vec![(0, 2), (3, 1)]);

        stats.forget(0);
        stats.forget(PROBE_STATS_SIZE as u32 + 10);
        assert_eq!(stats.count(0), 1);
        assert_eq!(stats.large_probes(), 0);
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn display_lists_populated_bins() {
        let mut stats = ProbeStats::default();
        stats.record(0);
        stats.record(1);
        stats.record(1);
        stats.record(100);

        assert_eq!(
            stats.to_string(),
            "probe 00: 1\nprobe 01: 2\nprobe 64+: 1\n"
        );
        assert_eq!(ProbeStats::default().to_string(), "");
    }
}
