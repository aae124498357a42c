//! Per-node weight bookkeeping for smooth weighted round-robin.

/// How a finished call should move a node's efficient weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Call succeeded: weight recovers by one.
    Success,
    /// Deadline exceeded or backend unavailable: weight collapses to 1.
    Quarantine,
    /// Any other failure: weight drops by one.
    Degrade,
}

/// SWRR state of one weight dimension of a node.
///
/// `efficient` always stays within `[1, 2 * configured]`; a configured
/// weight of 0 is treated as 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightTrack {
    configured: u32,
    current: i64,
    efficient: u32,
}

impl WeightTrack {
    /// A fresh track: both the current and efficient weights start at the
    /// configured weight.
    pub fn new(configured: u32) -> Self {
        let configured = configured.max(1);
        Self {
            configured,
            current: i64::from(configured),
            efficient: configured,
        }
    }

    pub fn configured(&self) -> u32 {
        self.configured
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn efficient(&self) -> u32 {
        self.efficient
    }

    /// Whether this track was created from `configured`.
    pub fn is_configured_as(&self, configured: u32) -> bool {
        self.configured == configured.max(1)
    }

    /// First SWRR step: grow the current weight. Returns the efficient
    /// weight for the caller's running total.
    pub(crate) fn advance(&mut self) -> i64 {
        self.current += i64::from(self.efficient);
        i64::from(self.efficient)
    }

    /// Second SWRR step, applied only to the selected node.
    pub(crate) fn settle(&mut self, total: i64) {
        self.current -= total;
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.efficient = match outcome {
            Outcome::Success => self
                .efficient
                .saturating_add(1)
                .min(self.configured.saturating_mul(2)),
            Outcome::Quarantine => 1,
            Outcome::Degrade => self.efficient.saturating_sub(1).max(1),
        };
    }
}

/// One SWRR round over `tracks`, visiting nodes in order.
///
/// Every track is advanced, the first track with the strictly greatest
/// current weight wins and is settled. Returns the winner's position.
#[cfg(test)]
pub(crate) fn swrr_round(tracks: &mut [WeightTrack]) -> Option<usize> {
    let mut total = 0;
    let mut selected: Option<(usize, i64)> = None;
    for (idx, track) in tracks.iter_mut().enumerate() {
        total += track.advance();
        let current = track.current();
        if selected.is_none_or(|(_, best)| current > best) {
            selected = Some((idx, current));
        }
    }
    let (idx, _) = selected?;
    tracks[idx].settle(total);
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Selection ──

    #[test]
    fn swrr_sequence_is_smooth() {
        let mut tracks: Vec<_> = [1, 2, 3, 4].into_iter().map(WeightTrack::new).collect();
        let picks: Vec<_> = (0..10)
            .map(|_| swrr_round(&mut tracks).unwrap())
            .collect();
        assert_eq!(picks, vec![3, 2, 1, 3, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn swrr_spreads_heavy_node() {
        let mut tracks: Vec<_> = [5, 1, 1].into_iter().map(WeightTrack::new).collect();
        let picks: Vec<_> = (0..7).map(|_| swrr_round(&mut tracks).unwrap()).collect();
        assert_eq!(picks, vec![0, 0, 0, 1, 0, 0, 2]);
    }

    #[test]
    fn swrr_empty_selects_nothing() {
        assert_eq!(swrr_round(&mut []), None);
    }

    #[test]
    fn current_weights_sum_is_conserved() {
        let mut tracks: Vec<_> = [3, 1, 2].into_iter().map(WeightTrack::new).collect();
        let initial: i64 = tracks.iter().map(WeightTrack::current).sum();
        for _ in 0..20 {
            swrr_round(&mut tracks);
            let sum: i64 = tracks.iter().map(WeightTrack::current).sum();
            assert_eq!(sum, initial);
        }
    }

    // ── Feedback ──

    #[test]
    fn success_caps_at_double_configured() {
        let mut track = WeightTrack::new(3);
        for _ in 0..10 {
            track.record(Outcome::Success);
        }
        assert_eq!(track.efficient(), 6);
    }

    #[test]
    fn quarantine_collapses_then_recovers() {
        let mut track = WeightTrack::new(5);
        track.record(Outcome::Quarantine);
        assert_eq!(track.efficient(), 1);
        track.record(Outcome::Success);
        assert_eq!(track.efficient(), 2);
    }

    #[test]
    fn degrade_floors_at_one() {
        let mut track = WeightTrack::new(2);
        track.record(Outcome::Degrade);
        assert_eq!(track.efficient(), 1);
        track.record(Outcome::Degrade);
        assert_eq!(track.efficient(), 1);
    }

    #[test]
    fn zero_weight_is_treated_as_one() {
        let track = WeightTrack::new(0);
        assert_eq!(track.configured(), 1);
        assert_eq!(track.efficient(), 1);
        assert!(track.is_configured_as(0));
        assert!(track.is_configured_as(1));
    }
}
