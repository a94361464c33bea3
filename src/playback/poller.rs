use super::{decide, Credit, PlaybackSnapshot, PlaybackSource, PollStatus};
use crate::error::TallyError;
use crate::stats::StatsDatabase;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why polling stopped for good - needs someone to look at it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    RateLimited { retry_after: Option<u64> },
    Unauthorized,
}

impl HaltReason {
    pub fn into_error(self) -> TallyError {
        match self {
            HaltReason::RateLimited { retry_after } => TallyError::RateLimited { retry_after },
            HaltReason::Unauthorized => {
                TallyError::TransientAuth("access token rejected again after refresh".to_string())
            }
        }
    }
}

/// Why a single tick was dropped; the next tick carries on as normal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Timeout,
    Transport(String),
    RefreshFailed(String),
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Something is playing; `credit` is set when time was actually written
    Recorded { credit: Option<Credit> },
    Idle,
    Skipped(SkipReason),
    Halted(HaltReason),
}

/// Owns the previous snapshot and drives one fetch-decide-accumulate tick at a time.
///
/// Ticks take `&mut self`, so two of them can never race on the snapshot.
pub struct PollLoop {
    source: Arc<dyn PlaybackSource>,
    interval_ms: u64,
    fetch_timeout: Duration,
    previous: Option<PlaybackSnapshot>,
    halted: Option<HaltReason>,
}

impl PollLoop {
    pub fn new(source: Arc<dyn PlaybackSource>, interval_ms: u64, fetch_timeout: Duration) -> Self {
        Self {
            source,
            interval_ms,
            fetch_timeout,
            previous: None,
            halted: None,
        }
    }

    pub fn previous(&self) -> Option<&PlaybackSnapshot> {
        self.previous.as_ref()
    }

    pub fn halted(&self) -> Option<&HaltReason> {
        self.halted.as_ref()
    }

    pub async fn tick(&mut self, db: &StatsDatabase, now: DateTime<Utc>) -> TickOutcome {
        if let Some(reason) = &self.halted {
            return TickOutcome::Halted(reason.clone());
        }

        let current = match self.fetch().await {
            Ok(current) => current,
            Err(TickOutcome::Halted(reason)) => {
                error!("Polling halted: {:?}", reason);
                self.halted = Some(reason.clone());
                return TickOutcome::Halted(reason);
            }
            Err(outcome) => {
                warn!("Skipping poll tick: {:?}", outcome);
                return outcome;
            }
        };

        let credit = decide(self.previous.as_ref(), current.as_ref(), self.interval_ms);
        self.log_transition(current.as_ref(), credit.as_ref());

        let mut applied = None;
        if let Some(credit) = credit.filter(Credit::is_creditable) {
            let track_id = credit.track_id.as_deref().unwrap_or_default();
            if let Err(e) = db.accumulate(track_id, &credit.track_name, &credit.artist_name, credit.delta_ms) {
                // keep `previous` so the next tick re-derives this gap
                error!("Failed to store playtime for {}: {}", track_id, e);
                return TickOutcome::Skipped(SkipReason::Store(e.to_string()));
            }
            applied = Some(credit);
        }

        if let Some(playlist_id) = current.as_ref().and_then(|s| s.context_playlist_id.as_deref()) {
            // playtime is already committed, so a failure here must not roll back `previous`
            match db.touch_playlist(playlist_id, now) {
                Ok(()) => debug!("Updated playlist {} last played at {}", playlist_id, now),
                Err(e) => warn!("Failed to record playlist {}: {}", playlist_id, e),
            }
        }

        let playing = current.is_some();
        self.previous = current;

        if playing {
            TickOutcome::Recorded { credit: applied }
        } else {
            TickOutcome::Idle
        }
    }

    /// Ask the source once, refreshing credentials and retrying at most one time
    async fn fetch(&self) -> Result<Option<PlaybackSnapshot>, TickOutcome> {
        let mut refreshed = false;

        loop {
            let status = match tokio::time::timeout(self.fetch_timeout, self.source.poll()).await {
                Err(_) => return Err(TickOutcome::Skipped(SkipReason::Timeout)),
                Ok(Err(TallyError::RateLimited { retry_after })) => {
                    return Err(TickOutcome::Halted(HaltReason::RateLimited { retry_after }))
                }
                Ok(Err(e)) => return Err(TickOutcome::Skipped(SkipReason::Transport(e.to_string()))),
                Ok(Ok(status)) => status,
            };

            match status {
                PollStatus::Playing(snapshot) => return Ok(Some(snapshot)),
                PollStatus::Idle => return Ok(None),
                PollStatus::RateLimited { retry_after } => {
                    return Err(TickOutcome::Halted(HaltReason::RateLimited { retry_after }))
                }
                PollStatus::Unauthorized if refreshed => {
                    return Err(TickOutcome::Halted(HaltReason::Unauthorized))
                }
                PollStatus::Unauthorized => {
                    info!("Access token expired, refreshing");
                    match tokio::time::timeout(self.fetch_timeout, self.source.refresh_credentials()).await {
                        Err(_) => return Err(TickOutcome::Skipped(SkipReason::Timeout)),
                        Ok(Err(TallyError::TransientAuth(_))) => {
                            return Err(TickOutcome::Halted(HaltReason::Unauthorized))
                        }
                        Ok(Err(e)) => {
                            return Err(TickOutcome::Skipped(SkipReason::RefreshFailed(e.to_string())))
                        }
                        Ok(Ok(())) => refreshed = true,
                    }
                }
            }
        }
    }

    fn log_transition(&self, current: Option<&PlaybackSnapshot>, credit: Option<&Credit>) {
        match (self.previous.as_ref(), current) {
            (None, Some(curr)) => debug!(
                "[ON] {} - {} +{}ms",
                curr.artist_name,
                curr.track_name,
                credit.map_or(0, |c| c.delta_ms)
            ),
            (Some(_), None) => debug!("[OFF] player stopped"),
            (Some(prev), Some(curr)) if prev.track_id == curr.track_id => debug!(
                "[SAME] {} - {} +{}ms",
                curr.artist_name,
                curr.track_name,
                credit.map_or(0, |c| c.delta_ms)
            ),
            (Some(_), Some(curr)) => debug!(
                "[CHANGE] {} - {} +{}ms",
                curr.artist_name,
                curr.track_name,
                credit.map_or(0, |c| c.delta_ms)
            ),
            (None, None) => {}
        }
    }
}
