// Prompt playlists - free text in, a real playlist out
// The generator proposes tracks, the catalog decides which ones exist, and
// misses get sent back for replacements a bounded number of times

pub mod openai; // chat-completions backed generator

pub use openai::OpenAiGenerator;

use crate::error::{TallyError, TallyResult};
use crate::playlists::{resolve_candidates, PlaylistService, ResolvedTrack, TrackCandidate};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Anything shorter is almost certainly a typo
pub const MIN_PROMPT_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPlaylist {
    pub playlist_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub track_list: Vec<TrackCandidate>,
}

#[async_trait]
pub trait TrackListGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> TallyResult<GeneratedPlaylist>;

    /// Suggest one substitute per unresolved track, in the spirit of `prompt`
    async fn replace(
        &self,
        prompt: &str,
        unresolved: &[TrackCandidate],
        kept: &[TrackCandidate],
    ) -> TallyResult<Vec<TrackCandidate>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPlaylistReport {
    pub playlist_id: String,
    pub title: String,
    pub added: usize,
    pub reprompts: usize,
    /// Tracks still missing once the re-prompt budget ran out
    pub unresolved: Vec<TrackCandidate>,
}

impl PromptPlaylistReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub async fn build_prompt_playlist(
    generator: &dyn TrackListGenerator,
    service: &dyn PlaylistService,
    prompt: &str,
    max_reprompts: usize,
) -> TallyResult<PromptPlaylistReport> {
    let prompt = prompt.trim();
    if prompt.chars().count() < MIN_PROMPT_CHARS {
        return Err(TallyError::InvalidInput(format!(
            "prompt must be at least {} characters",
            MIN_PROMPT_CHARS
        )));
    }

    let generated = generator.generate(prompt).await?;
    info!(
        "Generator proposed '{}' with {} tracks",
        generated.playlist_title,
        generated.track_list.len()
    );

    let first = resolve_candidates(service, &generated.track_list).await?;
    let mut tried: HashSet<TrackCandidate> = first.unresolved.iter().cloned().collect();
    let mut kept: Vec<ResolvedTrack> = Vec::new();
    let mut unresolved = merge_resolved(&mut kept, first.resolved);
    unresolved.extend(first.unresolved);

    let mut reprompts = 0;
    while !unresolved.is_empty() && reprompts < max_reprompts {
        reprompts += 1;
        info!("Re-prompting for {} unavailable tracks (round {})", unresolved.len(), reprompts);

        let kept_candidates: Vec<TrackCandidate> = kept.iter().map(|r| r.candidate.clone()).collect();
        let mut fresh: Vec<TrackCandidate> = generator
            .replace(prompt, &unresolved, &kept_candidates)
            .await?
            .into_iter()
            .filter(|c| !tried.contains(c) && !kept_candidates.contains(c))
            .collect();
        fresh.truncate(unresolved.len());

        // slots the generator didn't offer anything new for stay open
        let leftover = unresolved.split_off(fresh.len());

        let round = resolve_candidates(service, &fresh).await?;
        tried.extend(round.unresolved.iter().cloned());
        unresolved = merge_resolved(&mut kept, round.resolved);
        unresolved.extend(round.unresolved);
        unresolved.extend(leftover);
    }

    if kept.is_empty() {
        return Err(TallyError::NotFound(format!(
            "none of the suggested tracks for '{}' exist on Spotify",
            generated.playlist_title
        )));
    }

    if !unresolved.is_empty() {
        let missing: Vec<String> = unresolved.iter().map(|c| c.to_string()).collect();
        warn!(
            "Could not fully satisfy request after {} re-prompts, still missing: {}",
            reprompts,
            missing.join(", ")
        );
    }

    let playlist_id = service.create(&generated.playlist_title, &generated.description).await?;
    let uris: Vec<String> = kept.iter().map(|r| r.uri.clone()).collect();
    service.add_tracks(&playlist_id, &uris).await?;
    info!("Created '{}' with {} tracks", generated.playlist_title, uris.len());

    Ok(PromptPlaylistReport {
        playlist_id,
        title: generated.playlist_title,
        added: uris.len(),
        reprompts,
        unresolved,
    })
}

/// Append new hits to `kept`; a hit whose uri is already there doesn't fill a slot
fn merge_resolved(kept: &mut Vec<ResolvedTrack>, hits: Vec<ResolvedTrack>) -> Vec<TrackCandidate> {
    let mut duplicates = Vec::new();
    for hit in hits {
        if kept.iter().any(|k| k.uri == hit.uri) {
            duplicates.push(hit.candidate);
        } else {
            kept.push(hit);
        }
    }
    duplicates
}

/// Models like to wrap JSON in markdown fences even when told not to
pub(crate) fn strip_code_fences(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("fence pattern is valid")
    });

    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

pub(crate) fn parse_generated(text: &str) -> TallyResult<GeneratedPlaylist> {
    Ok(serde_json::from_str(strip_code_fences(text))?)
}
