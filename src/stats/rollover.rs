// Window rollover - archive the leaders, then start the period fresh
// Weekly runs on Mondays, monthly on the 1st; each at most once per calendar day

use super::{ChartEntry, StatsDatabase, Window};
use crate::error::TallyResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceJob {
    WeeklyRollover,
    MonthlyRollover,
}

impl MaintenanceJob {
    pub fn as_str(self) -> &'static str {
        match self {
            MaintenanceJob::WeeklyRollover => "weekly_rollover",
            MaintenanceJob::MonthlyRollover => "monthly_rollover",
        }
    }

    pub fn window(self) -> Window {
        match self {
            MaintenanceJob::WeeklyRollover => Window::Weekly,
            MaintenanceJob::MonthlyRollover => Window::Monthly,
        }
    }

    fn is_due_on(self, today: NaiveDate) -> bool {
        match self {
            MaintenanceJob::WeeklyRollover => today.weekday() == Weekday::Mon,
            MaintenanceJob::MonthlyRollover => today.day() == 1,
        }
    }

    /// Label of the period that just ended, e.g. "2026-W42" or "2026-09"
    pub fn period_label(self, today: NaiveDate) -> String {
        let last_day = today - Duration::days(1);
        match self {
            MaintenanceJob::WeeklyRollover => {
                let week = last_day.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            MaintenanceJob::MonthlyRollover => format!("{}-{:02}", last_day.year(), last_day.month()),
        }
    }
}

/// Jobs whose calendar day is `today` and that haven't already run today
pub fn due_rollovers(
    today: NaiveDate,
    last_run: impl Fn(MaintenanceJob) -> Option<NaiveDate>,
) -> Vec<MaintenanceJob> {
    [MaintenanceJob::WeeklyRollover, MaintenanceJob::MonthlyRollover]
        .into_iter()
        .filter(|job| job.is_due_on(today) && last_run(*job) != Some(today))
        .collect()
}

/// Run one rollover and record it; returns the archived leaders
pub fn run_rollover(
    db: &StatsDatabase,
    job: MaintenanceJob,
    chart_size: usize,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> TallyResult<Vec<ChartEntry>> {
    let window = job.window();
    let label = job.period_label(today);

    let leaders = db.roll_over(job, chart_size, today, now)?;

    if leaders.is_empty() {
        info!("{} rollover for {}: window was already empty", window, label);
    } else {
        info!("{} rollover for {}: archived top {} tracks", window, label, leaders.len());
    }

    Ok(leaders)
}
