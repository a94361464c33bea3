use super::PlaylistService;
use crate::error::{TallyError, TallyResult};
use crate::stats::StatsDatabase;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Inactivity threshold from a day count; negative or absurdly large counts are rejected
pub fn threshold_from_days(days: i64) -> TallyResult<Duration> {
    if days < 0 {
        return Err(TallyError::InvalidInput(format!(
            "inactivity threshold cannot be negative ({} days)",
            days
        )));
    }
    Duration::try_days(days).ok_or_else(|| {
        TallyError::InvalidInput(format!("inactivity threshold of {} days is out of range", days))
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<String>,
    /// (playlist id, what went wrong) - these stay registered and get retried next sweep
    pub failed: Vec<(String, String)>,
}

/// Unfollow every registered playlist not played for longer than `threshold`.
///
/// Each playlist is handled on its own: a failed removal is reported and the
/// sweep moves on to the next one. Rate limiting and rejected credentials stop
/// the sweep and come back as `Err`.
pub async fn sweep_inactive(
    db: &StatsDatabase,
    service: &dyn PlaylistService,
    threshold: Duration,
    now: DateTime<Utc>,
) -> TallyResult<SweepReport> {
    let mut report = SweepReport::default();

    for record in db.playlists()? {
        if now - record.last_played_at <= threshold {
            continue;
        }

        let playlist_id = record.playlist_id;
        if let Err(e) = service.remove(&playlist_id).await {
            // a 429 or rejected credentials end the whole sweep
            if e.halts_polling() {
                return Err(e);
            }
            warn!("Failed to unfollow playlist {}: {}", playlist_id, e);
            report.failed.push((playlist_id, e.to_string()));
            continue;
        }

        match db.delete_playlist(&playlist_id) {
            Ok(_) => {
                info!("Deleted inactive playlist {} (last played {})", playlist_id, record.last_played_at);
                report.removed.push(playlist_id);
            }
            Err(e) => {
                warn!("Unfollowed {} but could not forget it locally: {}", playlist_id, e);
                report.failed.push((playlist_id, e.to_string()));
            }
        }
    }

    Ok(report)
}
