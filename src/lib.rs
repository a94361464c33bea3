// playtally library - listening stats for a Spotify account
// Poll what's playing, credit the time to weekly/monthly/all-time charts,
// and turn charts (or a free-text prompt) into real playlists

pub mod config;    // settings file + env overrides
pub mod error;     // error kinds callers branch on
pub mod generator; // prompt -> track list -> playlist
pub mod playback;  // snapshots, attribution policy, poll loop
pub mod playlists; // chart publishing, inactive sweep
pub mod scheduler; // the one control task
pub mod spotify;   // Web API client
pub mod stats;     // SQLite windows and rollovers

#[cfg(test)]
mod testing;

// Export the stuff the binary actually uses
pub use config::Config;
pub use error::{TallyError, TallyResult};
pub use playback::{PlaybackSnapshot, PollLoop};
pub use scheduler::Scheduler;
pub use spotify::SpotifyClient;
pub use stats::{StatsDatabase, Window};
