use super::{ChartEntry, MaintenanceJob, PlaylistRecord, TrackRecord, Window};
use crate::error::TallyResult;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

pub struct StatsDatabase {
    conn: Connection,
}

impl StatsDatabase {
    pub fn new<P: AsRef<Path>>(db_path: P) -> TallyResult<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> TallyResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> TallyResult<()> {
        // One table per window, same shape - rowid keeps insertion order for tie breaks
        for window in Window::ALL {
            self.conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        track_id TEXT PRIMARY KEY,
                        track_name TEXT NOT NULL,
                        artist_name TEXT NOT NULL,
                        playtime_ms INTEGER NOT NULL DEFAULT 0
                    )",
                    window.table()
                ),
                [],
            )?;
        }

        // Playlists we've seen playback come from
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS playlist_record (
                playlist_id TEXT PRIMARY KEY,
                last_played_at TEXT NOT NULL
            )",
            [],
        )?;

        // Top-N snapshots taken right before a window gets cleared
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS chart_archive (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                window_name TEXT NOT NULL,
                period_label TEXT NOT NULL,
                rank INTEGER NOT NULL,
                track_name TEXT NOT NULL,
                artist_name TEXT NOT NULL,
                playtime_ms INTEGER NOT NULL,
                archived_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS maintenance_run (
                job TEXT PRIMARY KEY,
                last_run_on TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_archive_window_period ON chart_archive(window_name, period_label)",
            [],
        )?;

        Ok(())
    }

    /// Add `delta_ms` to the track in every window, all or nothing
    pub fn accumulate(
        &self,
        track_id: &str,
        track_name: &str,
        artist_name: &str,
        delta_ms: u64,
    ) -> TallyResult<()> {
        if delta_ms == 0 {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        for window in Window::ALL {
            tx.execute(
                &format!(
                    "INSERT INTO {} (track_id, track_name, artist_name, playtime_ms)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(track_id) DO UPDATE SET
                        track_name = excluded.track_name,
                        artist_name = excluded.artist_name,
                        playtime_ms = playtime_ms + excluded.playtime_ms",
                    window.table()
                ),
                params![track_id, track_name, artist_name, delta_ms],
            )?;
        }
        tx.commit()?;

        debug!(track_id, delta_ms, "accumulated playtime");
        Ok(())
    }

    /// Leaders of a window, longest playtime first, ties by first appearance
    pub fn top_n(&self, window: Window, limit: usize) -> TallyResult<Vec<ChartEntry>> {
        Self::select_top(&self.conn, window, limit)
    }

    fn select_top(conn: &Connection, window: Window, limit: usize) -> TallyResult<Vec<ChartEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT track_name, artist_name, playtime_ms
             FROM {}
             ORDER BY playtime_ms DESC, rowid ASC
             LIMIT ?1",
            window.table()
        ))?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ChartEntry {
                    track_name: row.get(0)?,
                    artist_name: row.get(1)?,
                    playtime_ms: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn track_record(&self, window: Window, track_id: &str) -> TallyResult<Option<TrackRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT track_id, track_name, artist_name, playtime_ms FROM {} WHERE track_id = ?1",
            window.table()
        ))?;

        let record = stmt
            .query_row(params![track_id], |row| Self::row_to_track_record(row))
            .optional()?;

        Ok(record)
    }

    /// Every row of a window in insertion order
    pub fn window_records(&self, window: Window) -> TallyResult<Vec<TrackRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT track_id, track_name, artist_name, playtime_ms FROM {} ORDER BY rowid ASC",
            window.table()
        ))?;

        let records = stmt
            .query_map([], |row| Self::row_to_track_record(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Archive the top `limit` rows of the job's window, empty it and record the
    /// run for `today`, all in one transaction
    pub fn roll_over(
        &self,
        job: MaintenanceJob,
        limit: usize,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> TallyResult<Vec<ChartEntry>> {
        let window = job.window();
        let period_label = job.period_label(today);
        let tx = self.conn.unchecked_transaction()?;

        let leaders = Self::select_top(&tx, window, limit)?;
        for (rank, entry) in leaders.iter().enumerate() {
            tx.execute(
                "INSERT INTO chart_archive
                 (window_name, period_label, rank, track_name, artist_name, playtime_ms, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    window.as_str(),
                    period_label,
                    (rank + 1) as i64,
                    entry.track_name,
                    entry.artist_name,
                    entry.playtime_ms,
                    now.to_rfc3339(),
                ],
            )?;
        }
        tx.execute(&format!("DELETE FROM {}", window.table()), [])?;
        Self::write_marker(&tx, job, today)?;
        tx.commit()?;

        Ok(leaders)
    }

    pub fn archived_chart(&self, window: Window, period_label: &str) -> TallyResult<Vec<ChartEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_name, artist_name, playtime_ms
             FROM chart_archive
             WHERE window_name = ?1 AND period_label = ?2
             ORDER BY rank ASC",
        )?;

        let entries = stmt
            .query_map(params![window.as_str(), period_label], |row| {
                Ok(ChartEntry {
                    track_name: row.get(0)?,
                    artist_name: row.get(1)?,
                    playtime_ms: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn touch_playlist(&self, playlist_id: &str, now: DateTime<Utc>) -> TallyResult<()> {
        self.conn.execute(
            "INSERT INTO playlist_record (playlist_id, last_played_at)
             VALUES (?1, ?2)
             ON CONFLICT(playlist_id) DO UPDATE SET
                last_played_at = excluded.last_played_at",
            params![playlist_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn playlists(&self) -> TallyResult<Vec<PlaylistRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT playlist_id, last_played_at FROM playlist_record ORDER BY rowid ASC")?;

        let records = stmt
            .query_map([], |row| {
                let raw: String = row.get(1)?;
                let last_played_at = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc);
                Ok(PlaylistRecord {
                    playlist_id: row.get(0)?,
                    last_played_at,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn delete_playlist(&self, playlist_id: &str) -> TallyResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM playlist_record WHERE playlist_id = ?1", params![playlist_id])?;
        Ok(removed > 0)
    }

    pub fn last_maintenance(&self, job: MaintenanceJob) -> TallyResult<Option<NaiveDate>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_run_on FROM maintenance_run WHERE job = ?1",
                params![job.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        // a garbled marker just means "never ran"
        Ok(raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
    }

    fn write_marker(conn: &Connection, job: MaintenanceJob, day: NaiveDate) -> TallyResult<()> {
        conn.execute(
            "INSERT INTO maintenance_run (job, last_run_on) VALUES (?1, ?2)
             ON CONFLICT(job) DO UPDATE SET last_run_on = excluded.last_run_on",
            params![job.as_str(), day.format("%Y-%m-%d").to_string()],
        )?;
        Ok(())
    }

    fn row_to_track_record(row: &Row) -> rusqlite::Result<TrackRecord> {
        Ok(TrackRecord {
            track_id: row.get(0)?,
            track_name: row.get(1)?,
            artist_name: row.get(2)?,
            playtime_ms: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn db() -> StatsDatabase {
        StatsDatabase::in_memory().unwrap()
    }

    // 2026-10-19 is a Monday
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn accumulate_hits_all_three_windows() {
        let db = db();
        db.accumulate("t1", "Heavy Is the Crown", "Linkin Park", 4_000).unwrap();

        for window in Window::ALL {
            let record = db.track_record(window, "t1").unwrap().unwrap();
            assert_eq!(record.playtime_ms, 4_000);
            assert_eq!(record.artist_name, "Linkin Park");
        }
    }

    #[test]
    fn repeated_accumulate_adds_up() {
        let db = db();
        db.accumulate("t1", "Song", "Artist", 2_500).unwrap();
        db.accumulate("t1", "Song", "Artist", 2_500).unwrap();

        let record = db.track_record(Window::Monthly, "t1").unwrap().unwrap();
        assert_eq!(record.playtime_ms, 5_000);
    }

    #[test]
    fn zero_delta_is_noop() {
        let db = db();
        db.accumulate("t1", "Song", "Artist", 0).unwrap();
        assert!(db.track_record(Window::Weekly, "t1").unwrap().is_none());
    }

    #[test]
    fn top_n_orders_by_playtime_then_insertion() {
        let db = db();
        db.accumulate("a", "Alpha", "X", 3_000).unwrap();
        db.accumulate("b", "Bravo", "Y", 9_000).unwrap();
        db.accumulate("c", "Charlie", "Z", 3_000).unwrap();
        db.accumulate("d", "Delta", "W", 1_000).unwrap();

        let top = db.top_n(Window::AllTime, 3).unwrap();
        let names: Vec<_> = top.iter().map(|e| e.track_name.as_str()).collect();
        assert_eq!(names, vec!["Bravo", "Alpha", "Charlie"]);
    }

    #[test]
    fn rollover_clears_only_its_window() {
        let db = db();
        db.accumulate("a", "Alpha", "X", 3_000).unwrap();
        db.accumulate("b", "Bravo", "Y", 9_000).unwrap();

        let monthly_before = db.window_records(Window::Monthly).unwrap();
        let alltime_before = db.window_records(Window::AllTime).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 5).unwrap();
        let leaders = db.roll_over(MaintenanceJob::WeeklyRollover, 1, monday(), now).unwrap();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].track_name, "Bravo");

        assert!(db.window_records(Window::Weekly).unwrap().is_empty());
        assert_eq!(db.window_records(Window::Monthly).unwrap(), monthly_before);
        assert_eq!(db.window_records(Window::AllTime).unwrap(), alltime_before);

        let archived = db.archived_chart(Window::Weekly, "2026-W42").unwrap();
        assert_eq!(archived, leaders);
    }

    #[test]
    fn rollover_of_empty_window_is_fine() {
        let db = db();
        let first = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let leaders = db.roll_over(MaintenanceJob::MonthlyRollover, 5, first, Utc::now()).unwrap();
        assert!(leaders.is_empty());
        assert_eq!(db.last_maintenance(MaintenanceJob::MonthlyRollover).unwrap(), Some(first));
    }

    #[test]
    fn playlist_touch_updates_timestamp() {
        let db = db();
        let first = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap();
        let later = first + Duration::days(3);

        db.touch_playlist("p1", first).unwrap();
        db.touch_playlist("p1", later).unwrap();

        let playlists = db.playlists().unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].last_played_at, later);

        assert!(db.delete_playlist("p1").unwrap());
        assert!(!db.delete_playlist("p1").unwrap());
    }

    #[test]
    fn maintenance_markers_round_trip() {
        let db = db();
        assert_eq!(db.last_maintenance(MaintenanceJob::WeeklyRollover).unwrap(), None);

        db.roll_over(MaintenanceJob::WeeklyRollover, 5, monday(), Utc::now()).unwrap();
        assert_eq!(db.last_maintenance(MaintenanceJob::WeeklyRollover).unwrap(), Some(monday()));
        assert_eq!(db.last_maintenance(MaintenanceJob::MonthlyRollover).unwrap(), None);
    }

    #[test]
    fn failed_marker_write_undoes_the_rollover() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("music_data.db");
        let db = StatsDatabase::new(&path).unwrap();
        db.accumulate("a", "Alpha", "X", 3_000).unwrap();

        let side = Connection::open(&path).unwrap();
        side.execute("DROP TABLE maintenance_run", []).unwrap();

        assert!(db.roll_over(MaintenanceJob::WeeklyRollover, 5, monday(), Utc::now()).is_err());

        // nothing archived, nothing cleared - the next attempt starts from scratch
        assert_eq!(db.window_records(Window::Weekly).unwrap().len(), 1);
        assert!(db.archived_chart(Window::Weekly, "2026-W42").unwrap().is_empty());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("music_data.db");

        {
            let db = StatsDatabase::new(&path).unwrap();
            db.accumulate("t1", "Song", "Artist", 7_000).unwrap();
        }

        let db = StatsDatabase::new(&path).unwrap();
        let record = db.track_record(Window::AllTime, "t1").unwrap().unwrap();
        assert_eq!(record.playtime_ms, 7_000);
    }
}
