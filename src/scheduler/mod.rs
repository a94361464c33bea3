// Scheduler - the single control task
// One interval drives polling; calendar maintenance piggybacks on the same tick,
// so a rollover can never overlap a poll

use crate::config::Config;
use crate::error::{TallyError, TallyResult};
use crate::playback::{PollLoop, TickOutcome};
use crate::playlists::{publish_entries, sweep_inactive, threshold_from_days, PlaylistService};
use crate::stats::rollover::run_rollover;
use crate::stats::{due_rollovers, MaintenanceJob, StatsDatabase};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub chart_size: usize,
    pub publish_playlists: bool,
    pub sweep_enabled: bool,
    pub inactive_threshold: chrono::Duration,
}

impl MaintenanceSettings {
    pub fn from_config(config: &Config) -> TallyResult<Self> {
        Ok(Self {
            chart_size: config.rollover.chart_size,
            publish_playlists: config.rollover.publish_playlists,
            sweep_enabled: config.rollover.sweep_enabled,
            inactive_threshold: threshold_from_days(config.rollover.inactive_threshold_days)?,
        })
    }
}

pub struct Scheduler {
    poll_loop: PollLoop,
    db: StatsDatabase,
    service: Arc<dyn PlaylistService>,
    settings: MaintenanceSettings,
    interval: Duration,
    alerts: bool,
}

impl Scheduler {
    pub fn new(
        poll_loop: PollLoop,
        db: StatsDatabase,
        service: Arc<dyn PlaylistService>,
        config: &Config,
    ) -> TallyResult<Self> {
        Ok(Self {
            poll_loop,
            db,
            service,
            settings: MaintenanceSettings::from_config(config)?,
            interval: Duration::from_millis(config.polling.interval_ms),
            alerts: config.alerts.desktop_notifications,
        })
    }

    pub fn db(&self) -> &StatsDatabase {
        &self.db
    }

    /// Poll until Ctrl-C or until polling halts
    pub async fn run(&mut self) -> TallyResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until<F>(&mut self, shutdown: F) -> TallyResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Polling every {:?}", self.interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping poller");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.step(Utc::now()).await {
                        self.alert(&e);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// One poll tick followed by whatever maintenance is due today
    pub async fn step(&mut self, now: DateTime<Utc>) -> TallyResult<TickOutcome> {
        let outcome = self.poll_loop.tick(&self.db, now).await;
        if let TickOutcome::Halted(reason) = &outcome {
            return Err(reason.clone().into_error());
        }

        let today = now.with_timezone(&Local).date_naive();
        self.run_due_maintenance(today, now).await?;
        Ok(outcome)
    }

    /// Run the rollovers due on `today`, publishing and sweeping as configured.
    ///
    /// Store and remote failures are logged and left for the next tick; only
    /// errors that must stop polling come back as `Err`.
    pub async fn run_due_maintenance(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> TallyResult<Vec<MaintenanceJob>> {
        let markers = self
            .db
            .last_maintenance(MaintenanceJob::WeeklyRollover)
            .and_then(|weekly| Ok((weekly, self.db.last_maintenance(MaintenanceJob::MonthlyRollover)?)));
        let (weekly_last, monthly_last) = match markers {
            Ok(markers) => markers,
            Err(e) => {
                // can't tell what already ran; try again next tick
                Self::tolerate(e, "reading maintenance markers")?;
                return Ok(Vec::new());
            }
        };
        let due = due_rollovers(today, |job| match job {
            MaintenanceJob::WeeklyRollover => weekly_last,
            MaintenanceJob::MonthlyRollover => monthly_last,
        });

        let mut ran = Vec::new();
        for job in due {
            let leaders = match run_rollover(&self.db, job, self.settings.chart_size, today, now) {
                Ok(leaders) => leaders,
                Err(e) => {
                    error!("{} failed, will retry: {}", job.as_str(), e);
                    continue;
                }
            };
            ran.push(job);

            if self.settings.publish_playlists && !leaders.is_empty() {
                let published = publish_entries(self.service.as_ref(), job.window(), &leaders, today).await;
                if let Err(e) = published {
                    Self::tolerate(e, "chart publishing")?;
                }
            }

            if job == MaintenanceJob::WeeklyRollover && self.settings.sweep_enabled {
                match sweep_inactive(&self.db, self.service.as_ref(), self.settings.inactive_threshold, now).await {
                    Ok(report) => info!(
                        "Sweep removed {} playlists, {} failed",
                        report.removed.len(),
                        report.failed.len()
                    ),
                    Err(e) => Self::tolerate(e, "playlist sweep")?,
                }
            }
        }

        Ok(ran)
    }

    fn tolerate(error: TallyError, what: &str) -> TallyResult<()> {
        if error.halts_polling() {
            return Err(error);
        }
        warn!("{} failed: {}", what, error);
        Ok(())
    }

    fn alert(&self, error: &TallyError) {
        error!("Polling stopped: {}", error);
        if !self.alerts {
            return;
        }

        #[cfg(feature = "notify")]
        {
            let shown = notify_rust::Notification::new()
                .summary("playtally stopped polling")
                .body(&error.to_string())
                .show();
            if let Err(e) = shown {
                warn!("Could not show desktop alert: {}", e);
            }
        }

        #[cfg(not(feature = "notify"))]
        warn!("Desktop alerts are enabled but playtally was built without the notify feature");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{PlaybackSnapshot, PollStatus};
    use crate::stats::Window;
    use crate::testing::FakePlaylists;
    use crate::testing::FakeSource;
    use chrono::TimeZone;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn noon(day: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).unwrap())
    }

    fn scheduler(
        script: Vec<TallyResult<PollStatus>>,
        service: Arc<FakePlaylists>,
        tweak: impl FnOnce(&mut Config),
    ) -> Scheduler {
        let mut config = Config::default();
        tweak(&mut config);
        let source = Arc::new(FakeSource::new(script));
        let poll_loop = PollLoop::new(source, config.polling.interval_ms, Duration::from_secs(1));
        Scheduler::new(poll_loop, StatsDatabase::in_memory().unwrap(), service, &config).unwrap()
    }

    fn playing(id: &str, progress_ms: u64) -> TallyResult<PollStatus> {
        Ok(PollStatus::Playing(PlaybackSnapshot::new(id, "Numb", "Linkin Park", progress_ms)))
    }

    #[tokio::test]
    async fn steps_accumulate_playtime() {
        let mut scheduler = scheduler(
            vec![playing("a", 3_000), playing("a", 9_000)],
            Arc::new(FakePlaylists::default()),
            |_| {},
        );
        // a Sunday, so no maintenance is due
        let now = noon(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());

        scheduler.step(now).await.unwrap();
        scheduler.step(now).await.unwrap();

        let record = scheduler.db().track_record(Window::Weekly, "a").unwrap().unwrap();
        assert_eq!(record.playtime_ms, 9_000);
    }

    #[tokio::test]
    async fn rate_limit_ends_the_run() {
        let mut scheduler = scheduler(
            vec![Ok(PollStatus::RateLimited { retry_after: Some(60) })],
            Arc::new(FakePlaylists::default()),
            |_| {},
        );

        let err = scheduler.run_until(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, TallyError::RateLimited { retry_after: Some(60) }));
    }

    #[tokio::test]
    async fn shutdown_stops_cleanly() {
        let mut scheduler = scheduler(vec![], Arc::new(FakePlaylists::default()), |_| {});
        scheduler.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn monday_rolls_weekly_and_sweeps_once() {
        let service = Arc::new(FakePlaylists::with_tracks(&[("Numb", "Linkin Park")]));
        let scheduler = scheduler(vec![], service.clone(), |config| {
            config.rollover.publish_playlists = true;
        });
        let db = scheduler.db();
        db.accumulate("a", "Numb", "Linkin Park", 60_000).unwrap();
        db.touch_playlist("stale", noon(monday()) - chrono::Duration::days(8)).unwrap();

        let ran = scheduler.run_due_maintenance(monday(), noon(monday())).await.unwrap();
        assert_eq!(ran, vec![MaintenanceJob::WeeklyRollover]);

        assert!(db.window_records(Window::Weekly).unwrap().is_empty());
        assert_eq!(db.window_records(Window::Monthly).unwrap().len(), 1);
        assert_eq!(db.archived_chart(Window::Weekly, "2026-W42").unwrap().len(), 1);
        assert_eq!(service.created.lock().unwrap()[0].1, "Weekly Chart - 2026-10-19");
        assert_eq!(*service.removed.lock().unwrap(), vec!["stale".to_string()]);

        // already done today
        let again = scheduler.run_due_maintenance(monday(), noon(monday())).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(service.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_markers_keep_polling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music_data.db");
        let db = StatsDatabase::new(&path).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute("DROP TABLE maintenance_run", [])
            .unwrap();

        let mut config = Config::default();
        config.polling.interval_ms = 10;
        let source = Arc::new(FakeSource::new(vec![]));
        let poll_loop = PollLoop::new(source.clone(), config.polling.interval_ms, Duration::from_secs(1));
        let mut scheduler = Scheduler::new(poll_loop, db, Arc::new(FakePlaylists::default()), &config).unwrap();

        let ran = scheduler.run_due_maintenance(monday(), noon(monday())).await.unwrap();
        assert!(ran.is_empty());

        scheduler.run_until(tokio::time::sleep(Duration::from_millis(60))).await.unwrap();
        assert!(source.polls() > 1);
    }

    #[tokio::test]
    async fn rate_limited_sweep_ends_the_run() {
        let service = Arc::new(FakePlaylists::default().rate_limited_removals());
        let scheduler = scheduler(vec![], service, |_| {});
        let stale = noon(monday()) - chrono::Duration::days(8);
        scheduler.db().touch_playlist("stale", stale).unwrap();

        let err = scheduler.run_due_maintenance(monday(), noon(monday())).await.unwrap_err();
        assert!(matches!(err, TallyError::RateLimited { retry_after: Some(30) }));
        assert_eq!(scheduler.db().playlists().unwrap().len(), 1);
    }

    #[test]
    fn oversized_threshold_is_rejected() {
        let mut config = Config::default();
        config.rollover.inactive_threshold_days = i64::MAX;
        let err = MaintenanceSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, TallyError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn first_of_month_rolls_monthly_without_publishing() {
        let service = Arc::new(FakePlaylists::with_tracks(&[("Numb", "Linkin Park")]));
        let scheduler = scheduler(vec![], service.clone(), |_| {});
        let db = scheduler.db();
        db.accumulate("a", "Numb", "Linkin Park", 60_000).unwrap();

        // 2026-10-01 is a Thursday
        let first = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let ran = scheduler.run_due_maintenance(first, noon(first)).await.unwrap();

        assert_eq!(ran, vec![MaintenanceJob::MonthlyRollover]);
        assert!(db.window_records(Window::Monthly).unwrap().is_empty());
        assert_eq!(db.window_records(Window::Weekly).unwrap().len(), 1);
        assert_eq!(db.archived_chart(Window::Monthly, "2026-09").unwrap().len(), 1);
        assert!(service.created.lock().unwrap().is_empty());
    }
}
