use super::{resolve_candidates, PlaylistService, TrackCandidate};
use crate::error::TallyResult;
use crate::stats::{ChartEntry, StatsDatabase, Window};
use chrono::NaiveDate;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartPlaylist {
    pub playlist_id: String,
    pub name: String,
    pub added: usize,
    pub unresolved: Vec<TrackCandidate>,
}

/// Build a playlist from the current leaders of `window`
pub async fn publish_chart(
    db: &StatsDatabase,
    service: &dyn PlaylistService,
    window: Window,
    limit: usize,
    today: NaiveDate,
) -> TallyResult<Option<ChartPlaylist>> {
    let entries = db.top_n(window, limit)?;
    publish_entries(service, window, &entries, today).await
}

/// Build a playlist from chart entries already read (e.g. the ones a rollover archived)
pub async fn publish_entries(
    service: &dyn PlaylistService,
    window: Window,
    entries: &[ChartEntry],
    today: NaiveDate,
) -> TallyResult<Option<ChartPlaylist>> {
    if entries.is_empty() {
        warn!("{} chart has no data, no playlist created", window);
        return Ok(None);
    }

    let candidates: Vec<TrackCandidate> = entries
        .iter()
        .map(|entry| TrackCandidate {
            track_name: entry.track_name.clone(),
            artist_name: entry.artist_name.clone(),
        })
        .collect();

    let resolution = resolve_candidates(service, &candidates).await?;
    if resolution.resolved.is_empty() {
        warn!("None of the {} chart tracks could be found, no playlist created", window);
        return Ok(None);
    }

    let day = today.format("%Y-%m-%d");
    let name = format!("{} Chart - {}", window.title(), day);
    let description = format!("Top tracks from {} chart generated on {}", window, day);

    let playlist_id = service.create(&name, &description).await?;
    let uris: Vec<String> = resolution.resolved.iter().map(|r| r.uri.clone()).collect();
    service.add_tracks(&playlist_id, &uris).await?;

    info!("Created '{}' with {} tracks", name, uris.len());
    Ok(Some(ChartPlaylist {
        playlist_id,
        name,
        added: uris.len(),
        unresolved: resolution.unresolved,
    }))
}
