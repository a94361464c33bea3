use super::PlaybackSnapshot;

/// Listening time attributed to one track by a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub track_id: Option<String>,
    pub track_name: String,
    pub artist_name: String,
    pub delta_ms: u64,
}

impl Credit {
    fn for_snapshot(snapshot: &PlaybackSnapshot, delta_ms: u64) -> Self {
        Self {
            track_id: snapshot.track_id.clone(),
            track_name: snapshot.track_name.clone(),
            artist_name: snapshot.artist_name.clone(),
            delta_ms,
        }
    }

    /// Only credits with an id and a positive delta reach the store
    pub fn is_creditable(&self) -> bool {
        self.track_id.is_some() && self.delta_ms > 0
    }
}

/// Decide how much listening time the gap between two polls is worth.
///
/// Every branch caps the credit at `interval_ms`, so one odd sample (a seek,
/// a skip, a late poll) can never add more than a single poll period.
pub fn decide(
    prev: Option<&PlaybackSnapshot>,
    curr: Option<&PlaybackSnapshot>,
    interval_ms: u64,
) -> Option<Credit> {
    match (prev, curr) {
        // nothing before, nothing now
        (None, None) => None,
        // player went quiet - the time since the last poll is unknown
        (Some(_), None) => None,
        // first sighting: only the part that fits in one poll window counts
        (None, Some(curr)) => Some(Credit::for_snapshot(curr, curr.progress_ms.min(interval_ms))),
        (Some(prev), Some(curr)) if prev.track_id == curr.track_id => {
            // backward seek saturates to zero, forward jumps stop at the cap
            let delta = curr.progress_ms.saturating_sub(prev.progress_ms).min(interval_ms);
            Some(Credit::for_snapshot(curr, delta))
        }
        // track changed: the old one gets nothing more, the new one is a first sighting
        (Some(_), Some(curr)) => Some(Credit::for_snapshot(curr, curr.progress_ms.min(interval_ms))),
    }
}
