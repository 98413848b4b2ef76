// ── Daily schedule ──
//
// Fires a smart sync of every configured model once per day at a fixed
// wall-clock time in a fixed UTC offset.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::service::{SyncJob, SyncService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
    offset_secs: i64,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, utc_offset_hours: i32) -> Result<Self, CoreError> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| CoreError::Config {
            message: format!("invalid schedule time {hour:02}:{minute:02}"),
        })?;
        if !(-14..=14).contains(&utc_offset_hours) {
            return Err(CoreError::Config {
                message: format!("schedule UTC offset out of range: {utc_offset_hours}"),
            });
        }
        Ok(Self {
            at,
            offset_secs: i64::from(utc_offset_hours) * 3600,
        })
    }

    /// First scheduled instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let offset = TimeDelta::seconds(self.offset_secs);
        let local_now = now.naive_utc() + offset;
        let mut next = local_now.date().and_time(self.at);
        if next <= local_now {
            next += TimeDelta::days(1);
        }
        (next - offset).and_utc()
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hours = self.offset_secs / 3600;
        write!(f, "{} daily (UTC{hours:+03})", self.at.format("%H:%M"))
    }
}

/// Trigger a smart sync of all models at each scheduled instant until
/// cancelled. A run that finds the gate busy is skipped.
pub async fn run_daily(service: SyncService, schedule: DailySchedule, cancel: CancellationToken) {
    info!(%schedule, "daily sync scheduled");

    loop {
        let next = schedule.next_after(Utc::now());
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        info!(next = %next.to_rfc3339(), "next scheduled sync");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        match service.trigger(SyncJob::Smart { model_ids: None }) {
            Ok(()) => info!("scheduled sync started"),
            Err(CoreError::Busy { current }) => {
                warn!(?current, "scheduled sync skipped, another sync is running");
            }
            Err(e) => error!(error = %e, "scheduled sync could not start"),
        }
    }

    info!("daily schedule stopped");
}
