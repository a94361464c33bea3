use crate::playback::{playlist_id_from_context, PlaybackSnapshot};
use serde::Deserialize;

/// Body of `GET /me/player`
#[derive(Debug, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub item: Option<TrackItem>,
    #[serde(default)]
    pub context: Option<PlayContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackItem {
    pub id: Option<String>,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

impl TrackItem {
    pub fn first_artist(&self) -> &str {
        self.artists.first().map(|a| a.name.as_str()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayContext {
    pub uri: String,
}

impl PlayerState {
    /// `None` when the player exists but nothing is loaded (item is null between tracks, ads, etc.)
    pub fn into_snapshot(self) -> Option<PlaybackSnapshot> {
        let item = self.item?;
        Some(PlaybackSnapshot {
            artist_name: item.first_artist().to_string(),
            track_id: item.id,
            track_name: item.name,
            progress_ms: self.progress_ms.unwrap_or(0),
            context_playlist_id: self.context.and_then(|c| playlist_id_from_context(&c.uri)),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub tracks: Page<TrackItem>,
}

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct UserProfile {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Only present when Spotify rotates it
    #[serde(default)]
    pub refresh_token: Option<String>,
}
