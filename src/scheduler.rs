//! Cron-driven trigger source for the collection and rollup jobs.
//!
//! `Scheduler` is the pure part: two parsed crontabs and the arithmetic for
//! the next due job. `run_loop` sleeps until that instant and dispatches, so
//! tests exercise the schedule without waiting on wall time.

use crate::config::Config;
use crate::services::{hourly, yearly};
use chrono::{DateTime, Datelike, Utc};
use cron::Schedule;
use log::{info, warn};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Hourly,
    Yearly,
}

pub struct Scheduler {
    hourly: Schedule,
    yearly: Schedule,
}

impl Scheduler {
    pub fn from_config(cfg: &Config) -> Result<Self, String> {
        let hourly = Schedule::from_str(&cfg.hourly_cron)
            .map_err(|e| format!("invalid HOURLY_CRONTAB \"{}\": {}", cfg.hourly_cron, e))?;
        let yearly = Schedule::from_str(&cfg.yearly_cron)
            .map_err(|e| format!("invalid YEARLY_CRONTAB \"{}\": {}", cfg.yearly_cron, e))?;
        Ok(Scheduler { hourly, yearly })
    }

    /// Next due job strictly after `now`. Ties go to the yearly job so the
    /// rollup is never starved by the collection cadence.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<(Job, DateTime<Utc>)> {
        let hourly = self.hourly.after(&now).next();
        let yearly = self.yearly.after(&now).next();
        match (hourly, yearly) {
            (Some(h), Some(y)) if h < y => Some((Job::Hourly, h)),
            (Some(h), None) => Some((Job::Hourly, h)),
            (_, Some(y)) => Some((Job::Yearly, y)),
            (None, None) => None,
        }
    }
}

pub fn run_loop(cfg: &Config) -> Result<(), String> {
    let scheduler = Scheduler::from_config(cfg)?;
    info!(
        "Scheduler started (hourly=\"{}\", yearly=\"{}\")",
        cfg.hourly_cron, cfg.yearly_cron
    );

    loop {
        let now = Utc::now();
        let Some((job, at)) = scheduler.next_after(now) else {
            return Err("no further scheduled runs; check the crontab expressions".to_string());
        };
        let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
        thread::sleep(wait);
        dispatch(cfg, job, Utc::now());
    }
}

fn dispatch(cfg: &Config, job: Job, now: DateTime<Utc>) {
    match job {
        Job::Hourly => {
            hourly::hourly_process(cfg, now);
        }
        Job::Yearly => {
            // The yearly crontab may fire more often than once a year; only
            // a January trigger rolls up the elapsed year.
            if now.month() == 1 {
                yearly::yearly_process(cfg, now);
            } else {
                warn!("Yearly trigger outside January ignored");
            }
        }
    }
}
