// Listening stats - where credited playtime ends up
// Three independent windows (weekly, monthly, all-time) plus the playlist registry

pub mod database; // SQLite storage for windows, playlists and archived charts
pub mod rollover; // weekly/monthly archive-then-clear maintenance

pub use database::StatsDatabase;
pub use rollover::{due_rollovers, MaintenanceJob};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accumulation window - mapped to a fixed table, never built from user input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    Weekly,
    Monthly,
    AllTime,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::Weekly, Window::Monthly, Window::AllTime];

    pub(crate) fn table(self) -> &'static str {
        match self {
            Window::Weekly => "weekly_track_record",
            Window::Monthly => "monthly_track_record",
            Window::AllTime => "alltime_track_record",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Window::Weekly => "weekly",
            Window::Monthly => "monthly",
            Window::AllTime => "all-time",
        }
    }

    /// "Weekly", "Monthly", "All-time" - used in playlist titles
    pub fn title(self) -> &'static str {
        match self {
            Window::Weekly => "Weekly",
            Window::Monthly => "Monthly",
            Window::AllTime => "All-time",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" | "week" => Ok(Window::Weekly),
            "monthly" | "month" => Ok(Window::Monthly),
            "all-time" | "alltime" | "all_time" | "all" => Ok(Window::AllTime),
            other => Err(format!("unknown window '{}' (expected weekly, monthly or all-time)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub playtime_ms: u64,
}

/// Reporting view of a track record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartEntry {
    pub track_name: String,
    pub artist_name: String,
    pub playtime_ms: u64,
}

impl ChartEntry {
    /// m:ss, or h:mm:ss once it gets long
    pub fn playtime_string(&self) -> String {
        let total_secs = self.playtime_ms / 1000;
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;

        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{}:{:02}", minutes, seconds)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub playlist_id: String,
    pub last_played_at: DateTime<Utc>,
}
