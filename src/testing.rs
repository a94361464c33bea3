// In-crate fakes for the remote collaborators, shared by the unit tests

use crate::error::{TallyError, TallyResult};
use crate::generator::{GeneratedPlaylist, TrackListGenerator};
use crate::playback::{PlaybackSource, PollStatus};
use crate::playlists::{PlaylistService, TrackCandidate};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays a scripted list of poll results; idle once the script runs out
pub struct FakeSource {
    script: Mutex<VecDeque<TallyResult<PollStatus>>>,
    delay: Option<Duration>,
    polls: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeSource {
    pub fn new(script: Vec<TallyResult<PollStatus>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
            polls: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSource for FakeSource {
    async fn poll(&self) -> TallyResult<PollStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(PollStatus::Idle))
    }

    async fn refresh_credentials(&self) -> TallyResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Catalog-backed playlist service that remembers everything it was asked to do
#[derive(Default)]
pub struct FakePlaylists {
    catalog: HashMap<(String, String), String>,
    failing_removals: HashSet<String>,
    rate_limit_removals: bool,
    pub created: Mutex<Vec<(String, String, String)>>,
    pub added: Mutex<Vec<(String, Vec<String>)>>,
    pub removed: Mutex<Vec<String>>,
    pub searches: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl FakePlaylists {
    pub fn with_tracks(tracks: &[(&str, &str)]) -> Self {
        let catalog = tracks
            .iter()
            .map(|(name, artist)| {
                let uri = format!("spotify:track:{}", name.to_lowercase().replace(' ', "-"));
                ((name.to_string(), artist.to_string()), uri)
            })
            .collect();
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn failing_removal_of(mut self, playlist_id: &str) -> Self {
        self.failing_removals.insert(playlist_id.to_string());
        self
    }

    /// Every removal answers with a 429
    pub fn rate_limited_removals(mut self) -> Self {
        self.rate_limit_removals = true;
        self
    }
}

#[async_trait]
impl PlaylistService for FakePlaylists {
    async fn create(&self, title: &str, description: &str) -> TallyResult<String> {
        let mut created = self.created.lock().unwrap();
        let id = format!("playlist-{}", created.len() + 1);
        created.push((id.clone(), title.to_string(), description.to_string()));
        Ok(id)
    }

    async fn search(&self, track_name: &str, artist_name: &str) -> TallyResult<Option<String>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .catalog
            .get(&(track_name.to_string(), artist_name.to_string()))
            .cloned())
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> TallyResult<()> {
        self.added.lock().unwrap().push((playlist_id.to_string(), uris.to_vec()));
        Ok(())
    }

    async fn remove(&self, playlist_id: &str) -> TallyResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limit_removals {
            return Err(TallyError::RateLimited { retry_after: Some(30) });
        }
        if self.failing_removals.contains(playlist_id) {
            return Err(TallyError::Http {
                status: 500,
                message: "unfollow failed".to_string(),
            });
        }
        self.removed.lock().unwrap().push(playlist_id.to_string());
        Ok(())
    }
}

/// Hands out a first list, then one scripted batch of replacements per re-prompt
pub struct FakeGenerator {
    first: GeneratedPlaylist,
    replacements: Mutex<VecDeque<Vec<TrackCandidate>>>,
    pub reprompts: Mutex<Vec<Vec<TrackCandidate>>>,
}

impl FakeGenerator {
    pub fn new(first: GeneratedPlaylist, replacements: Vec<Vec<TrackCandidate>>) -> Self {
        Self {
            first,
            replacements: Mutex::new(replacements.into()),
            reprompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TrackListGenerator for FakeGenerator {
    async fn generate(&self, _prompt: &str) -> TallyResult<GeneratedPlaylist> {
        Ok(self.first.clone())
    }

    async fn replace(
        &self,
        _prompt: &str,
        unresolved: &[TrackCandidate],
        _kept: &[TrackCandidate],
    ) -> TallyResult<Vec<TrackCandidate>> {
        self.reprompts.lock().unwrap().push(unresolved.to_vec());
        Ok(self.replacements.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub fn candidate(track_name: &str, artist_name: &str) -> TrackCandidate {
    TrackCandidate {
        track_name: track_name.to_string(),
        artist_name: artist_name.to_string(),
    }
}
