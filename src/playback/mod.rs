// Playback observation - the "what's playing right now" side of playtally
// A source hands out snapshots, the policy turns snapshot pairs into credited time,
// and the poll loop glues the two together tick by tick

pub mod policy; // pure delta attribution between two snapshots
pub mod poller; // owns the previous snapshot, drives one tick at a time

pub use policy::{decide, Credit};
pub use poller::{HaltReason, PollLoop, SkipReason, TickOutcome};

use crate::error::TallyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One point-in-time observation of the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub track_id: Option<String>, // local files have no provider id
    pub track_name: String,
    pub artist_name: String,
    pub progress_ms: u64,
    pub context_playlist_id: Option<String>,
}

impl PlaybackSnapshot {
    pub fn new(
        track_id: impl Into<String>,
        track_name: impl Into<String>,
        artist_name: impl Into<String>,
        progress_ms: u64,
    ) -> Self {
        Self {
            track_id: Some(track_id.into()),
            track_name: track_name.into(),
            artist_name: artist_name.into(),
            progress_ms,
            context_playlist_id: None,
        }
    }

    pub fn from_playlist(mut self, playlist_id: impl Into<String>) -> Self {
        self.context_playlist_id = Some(playlist_id.into());
        self
    }
}

/// What the provider said about one poll request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Playing(PlaybackSnapshot),
    Idle,
    Unauthorized,
    RateLimited { retry_after: Option<u64> },
}

/// Anything that can tell us what's playing (Spotify in production, fakes in tests)
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Transport failures come back as `Err` and mean "skip this tick"
    async fn poll(&self) -> TallyResult<PollStatus>;

    /// Swap the expired credential for a fresh one
    async fn refresh_credentials(&self) -> TallyResult<()>;
}

/// Pull the playlist id out of a context uri like `spotify:playlist:37i9dQZF1DX...`
/// (older user-scoped uris look like `spotify:user:<name>:playlist:<id>`)
pub fn playlist_id_from_context(uri: &str) -> Option<String> {
    let segments: Vec<&str> = uri.split(':').collect();
    segments
        .iter()
        .position(|s| *s == "playlist")
        .and_then(|idx| segments.get(idx + 1))
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}
