use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::pipeline::{CancelFlag, Pipeline};

/// Upper bound on any scheduler sleep, so admin changes to newsletters and
/// send times are picked up without a restart.
const REFRESH_INTERVAL_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct ScheduledJob {
    newsletter_id: i64,
    slug: String,
    time_of_day: String,
    fire_at: DateTime<Utc>,
}

/// Computes per-newsletter trigger instants and dispatches pipeline runs.
///
/// One logical job exists per `(newsletter, time-of-day)` pair. Triggers are
/// re-resolved from the timezone database after every wake-up, which is what
/// carries runs across DST transitions.
pub struct Scheduler {
    repo: Arc<Repository>,
    pipeline: Arc<Pipeline>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(repo: Arc<Repository>, pipeline: Arc<Pipeline>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            repo,
            pipeline,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle for signalling shutdown from another task.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub async fn run_loop(&mut self) -> Result<()> {
        info!("scheduler started");
        loop {
            let jobs = self.materialize_jobs(Utc::now()).await?;
            let now = Utc::now();

            let sleep_for = jobs
                .iter()
                .map(|job| (job.fire_at - now).num_seconds().max(0))
                .min()
                .unwrap_or(REFRESH_INTERVAL_SECS)
                .min(REFRESH_INTERVAL_SECS);

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(sleep_for as u64 + 1)) => {}
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("scheduler stopped");
                        return Ok(());
                    }
                }
            }

            let now = Utc::now();
            for job in jobs.iter().filter(|job| job.fire_at <= now) {
                self.dispatch(job);
            }
            // Loop back: next fires are recomputed from the tz database, so a
            // job never fires twice for the same scheduled instant.
        }
    }

    /// One upcoming trigger per `(active newsletter, schedule time)`.
    async fn materialize_jobs(&self, after: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let settings = self.repo.load_settings().await?;
        let default_tz: Tz = settings
            .default_timezone
            .parse()
            .unwrap_or(chrono_tz::UTC);

        let mut jobs = Vec::new();
        for newsletter in self.repo.list_active_newsletters().await? {
            let tz = newsletter.timezone.parse::<Tz>().unwrap_or(default_tz);
            let times = if newsletter.schedule_times.is_empty() {
                settings.default_send_times.clone()
            } else {
                newsletter.schedule_times.clone()
            };
            for time_of_day in times {
                match next_fire(&time_of_day, tz, after) {
                    Some(fire_at) => jobs.push(ScheduledJob {
                        newsletter_id: newsletter.id,
                        slug: newsletter.slug.clone(),
                        time_of_day,
                        fire_at,
                    }),
                    None => warn!(
                        "invalid schedule time '{}' for newsletter {}",
                        time_of_day, newsletter.slug
                    ),
                }
            }
        }
        Ok(jobs)
    }

    /// Fire-and-forget dispatch. Overlapping fires for one newsletter are
    /// coalesced by the pipeline's run gate.
    fn dispatch(&self, job: &ScheduledJob) {
        let pipeline = Arc::clone(&self.pipeline);
        let slug = job.slug.clone();
        let newsletter_id = job.newsletter_id;
        let time_of_day = job.time_of_day.clone();
        info!("firing newsletter {slug} ({time_of_day})");
        tokio::spawn(async move {
            match pipeline.run(newsletter_id, CancelFlag::default()).await {
                Ok(result) => info!(
                    "run {} for {slug} finished: {}",
                    result.run_id,
                    result.status.as_str()
                ),
                Err(AppError::RunInProgress(_)) => {
                    warn!("schedule.overlap: {slug} already running, fire coalesced");
                }
                Err(e) => warn!("scheduled run for {slug} failed: {e}"),
            }
        });
    }
}

/// The next instant strictly after `after` at which `HH:MM` occurs in `tz`.
///
/// DST handling defers to the timezone database: an ambiguous local time
/// (fall-back) resolves to its earliest mapping, and a non-existent one
/// (spring-forward gap) rolls to the next day the time exists.
pub fn next_fire(time_of_day: &str, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = parse_time(time_of_day)?;
    let local_after = after.with_timezone(&tz);

    for day_offset in 0..8 {
        let date = local_after.date_naive() + ChronoDuration::days(day_offset);
        let naive = date.and_time(time);
        let resolved = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => None,
        };
        if let Some(local) = resolved {
            let instant = local.with_timezone(&Utc);
            if instant > after {
                return Some(instant);
            }
        }
    }
    None
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.split_once(':')?;
    if hour.len() != 2 || minute.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
}
