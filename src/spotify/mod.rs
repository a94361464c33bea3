// Spotify Web API client
// Implements both the playback source the poller reads and the playlist service
// the chart/prompt/sweep code writes through

pub mod models; // wire shapes for the handful of endpoints we touch

use crate::config::SpotifyConfig;
use crate::error::{TallyError, TallyResult};
use crate::playback::{PlaybackSource, PollStatus};
use crate::playlists::PlaylistService;
use async_trait::async_trait;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use models::{CreatedPlaylist, PlayerState, SearchResponse, TokenResponse, TrackItem, UserProfile};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Spotify rejects bigger batches on the add-items endpoint
const ADD_TRACKS_CHUNK: usize = 100;
const SEARCH_LIMIT: &str = "5";

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

pub struct SpotifyClient {
    http: Client,
    api_url: String,
    token_url: String,
    market: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    tokens: RwLock<Tokens>,
    user_id: OnceCell<String>,
}

/// Seconds from a `Retry-After` header, if it's there and numeric
pub(crate) fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig, timeout: Duration) -> TallyResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            market: config.market.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            tokens: RwLock::new(Tokens {
                access: config.access_token.clone(),
                refresh: config.refresh_token.clone(),
            }),
            user_id: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn access_token(&self) -> TallyResult<String> {
        if let Some(token) = self.tokens.read().await.access.clone() {
            return Ok(token);
        }
        self.refresh().await?;
        self.tokens
            .read()
            .await
            .access
            .clone()
            .ok_or_else(|| TallyError::TransientAuth("no access token after refresh".to_string()))
    }

    async fn refresh(&self) -> TallyResult<()> {
        let (client_id, client_secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                return Err(TallyError::TransientAuth(
                    "spotify.client_id and spotify.client_secret are required to refresh".to_string(),
                ))
            }
        };
        let refresh_token = self
            .tokens
            .read()
            .await
            .refresh
            .clone()
            .ok_or_else(|| TallyError::TransientAuth("no refresh token configured".to_string()))?;

        info!("Refreshing Spotify access token");
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                return Err(TallyError::TransientAuth(format!("token refresh rejected: {}", body)));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(TallyError::RateLimited {
                    retry_after: retry_after_secs(response.headers()),
                })
            }
            s if !s.is_success() => {
                return Err(TallyError::Http {
                    status: s.as_u16(),
                    message: "token refresh failed".to_string(),
                })
            }
            _ => {}
        }

        let fresh: TokenResponse = response.json().await?;
        let mut tokens = self.tokens.write().await;
        tokens.access = Some(fresh.access_token);
        if let Some(rotated) = fresh.refresh_token {
            debug!("Spotify rotated the refresh token");
            tokens.refresh = Some(rotated);
        }
        Ok(())
    }

    /// Send a request built by `build`, refreshing and retrying once on 401
    async fn send<F>(&self, build: F) -> TallyResult<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder + Send + Sync,
    {
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            let response = build(&self.http, &token).send().await?;

            match response.status() {
                StatusCode::UNAUTHORIZED if !refreshed => {
                    refreshed = true;
                    self.refresh().await?;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(TallyError::TransientAuth(
                        "access token rejected again after refresh".to_string(),
                    ))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after_secs(response.headers());
                    warn!("Spotify rate limit hit (retry after {:?}s)", retry_after);
                    return Err(TallyError::RateLimited { retry_after });
                }
                s if s.is_success() => return Ok(response),
                s => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(TallyError::Http {
                        status: s.as_u16(),
                        message,
                    });
                }
            }
        }
    }

    async fn current_user_id(&self) -> TallyResult<&str> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let url = self.url("/me");
                let response = self.send(|http, token| http.get(&url).bearer_auth(token)).await?;
                let profile: UserProfile = response.json().await?;
                Ok::<_, TallyError>(profile.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl PlaybackSource for SpotifyClient {
    async fn poll(&self) -> TallyResult<PollStatus> {
        let token = match self.tokens.read().await.access.clone() {
            Some(token) => token,
            None => return Ok(PollStatus::Unauthorized),
        };

        let response = self
            .http
            .get(self.url("/me/player"))
            .query(&[("market", self.market.as_str())])
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(PollStatus::Idle),
            StatusCode::UNAUTHORIZED => Ok(PollStatus::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Ok(PollStatus::RateLimited {
                retry_after: retry_after_secs(response.headers()),
            }),
            s if s.is_success() => {
                let state: PlayerState = response.json().await?;
                Ok(state.into_snapshot().map_or(PollStatus::Idle, PollStatus::Playing))
            }
            s => Err(TallyError::Http {
                status: s.as_u16(),
                message: "player state request failed".to_string(),
            }),
        }
    }

    async fn refresh_credentials(&self) -> TallyResult<()> {
        self.refresh().await
    }
}

#[async_trait]
impl PlaylistService for SpotifyClient {
    async fn create(&self, title: &str, description: &str) -> TallyResult<String> {
        let user_id = self.current_user_id().await?;
        let url = self.url(&format!("/users/{}/playlists", user_id));
        let body = json!({
            "name": title,
            "description": description,
            "public": false,
        });

        let response = self
            .send(|http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let created: CreatedPlaylist = response.json().await?;
        info!("Created playlist '{}' ({})", title, created.id);
        Ok(created.id)
    }

    async fn search(&self, track_name: &str, artist_name: &str) -> TallyResult<Option<String>> {
        let url = self.url("/search");
        let query = format!("track:{} artist:{}", track_name, artist_name);

        let response = self
            .send(|http, token| {
                http.get(&url).bearer_auth(token).query(&[
                    ("q", query.as_str()),
                    ("type", "track"),
                    ("market", self.market.as_str()),
                    ("limit", SEARCH_LIMIT),
                ])
            })
            .await?;
        let results: SearchResponse = response.json().await?;

        Ok(best_match(track_name, artist_name, &results.tracks.items).map(|item| item.uri.clone()))
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> TallyResult<()> {
        let url = self.url(&format!("/playlists/{}/tracks", playlist_id));
        for chunk in uris.chunks(ADD_TRACKS_CHUNK) {
            let body = json!({ "uris": chunk });
            self.send(|http, token| http.post(&url).bearer_auth(token).json(&body))
                .await?;
            debug!("Added {} tracks to {}", chunk.len(), playlist_id);
        }
        Ok(())
    }

    async fn remove(&self, playlist_id: &str) -> TallyResult<()> {
        let url = self.url(&format!("/playlists/{}/followers", playlist_id));
        self.send(|http, token| http.delete(&url).bearer_auth(token)).await?;
        Ok(())
    }
}

/// Pick the search hit that best matches what we asked for.
///
/// Falls back to Spotify's own ranking when nothing scores at all.
pub(crate) fn best_match<'a>(track_name: &str, artist_name: &str, items: &'a [TrackItem]) -> Option<&'a TrackItem> {
    let matcher = SkimMatcherV2::default().ignore_case();
    let score = |choice: &str, wanted: &str| -> i64 {
        let forward = matcher.fuzzy_match(choice, wanted);
        let backward = matcher.fuzzy_match(wanted, choice);
        forward.max(backward).unwrap_or(0)
    };

    let mut best: Option<(&TrackItem, i64)> = None;
    for item in items {
        let total = score(&item.name, track_name) + score(item.first_artist(), artist_name);
        if best.map_or(true, |(_, top)| total > top) {
            best = Some((item, total));
        }
    }

    best.map(|(item, _)| item)
}
