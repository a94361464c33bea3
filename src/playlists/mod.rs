// Playlist materialization - turning (track, artist) pairs into real playlists
// Also home of the chart publishing and the inactive-playlist sweep

pub mod chart; // playlists built from window leaders
pub mod sweep; // unfollow playlists nobody has played in a while

pub use chart::{publish_chart, publish_entries, ChartPlaylist};
pub use sweep::{sweep_inactive, threshold_from_days, SweepReport};

use crate::error::{TallyError, TallyResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many searches may be in flight while resolving a list
const SEARCH_CONCURRENCY: usize = 4;

/// The service that owns playlists (Spotify in production)
#[async_trait]
pub trait PlaylistService: Send + Sync {
    /// Create an empty private playlist, returning its id
    async fn create(&self, title: &str, description: &str) -> TallyResult<String>;

    /// Best matching track uri, `None` when the catalog has nothing
    async fn search(&self, track_name: &str, artist_name: &str) -> TallyResult<Option<String>>;

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> TallyResult<()>;

    async fn remove(&self, playlist_id: &str) -> TallyResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub track_name: String,
    pub artist_name: String,
}

impl std::fmt::Display for TrackCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.track_name, self.artist_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub candidate: TrackCandidate,
    pub uri: String,
}

/// Outcome of looking a list up in the catalog; order of the input is kept on both sides
#[derive(Debug, Default, Clone)]
pub struct Resolution {
    pub resolved: Vec<ResolvedTrack>,
    pub unresolved: Vec<TrackCandidate>,
}

/// Search every candidate. A miss lands in `unresolved`; rate limits and auth failures abort.
pub async fn resolve_candidates(
    service: &dyn PlaylistService,
    candidates: &[TrackCandidate],
) -> TallyResult<Resolution> {
    let lookups: Vec<(TrackCandidate, Option<String>)> = stream::iter(candidates.iter().cloned())
        .map(|candidate| async move {
            match service.search(&candidate.track_name, &candidate.artist_name).await {
                Ok(uri) => Ok((candidate, uri)),
                Err(TallyError::NotFound(_)) => Ok((candidate, None)),
                Err(e) => Err(e),
            }
        })
        .buffered(SEARCH_CONCURRENCY)
        .try_collect()
        .await?;

    let mut resolution = Resolution::default();
    for (candidate, uri) in lookups {
        match uri {
            Some(uri) => resolution.resolved.push(ResolvedTrack { candidate, uri }),
            None => {
                warn!("'{}' not found on Spotify", candidate);
                resolution.unresolved.push(candidate);
            }
        }
    }

    Ok(resolution)
}
