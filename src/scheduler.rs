//! Background scheduling: periodic notification passes and the daily
//! dispatch-history prune, driven by cron expressions.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::error::ConfigError;
use crate::server::AppState;

pub struct Scheduler {
    state: Arc<AppState>,
    check: Schedule,
    prune: Schedule,
    retention_days: i64,
    /// Held for the duration of a pass so overlapping ticks collapse.
    pass_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, config: &ScheduleConfig) -> Result<Self, ConfigError> {
        let parse = |key: &str, expr: &str| {
            Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        };
        Ok(Self {
            state,
            check: parse("AGROWATCH_CHECK_CRON", &config.check_cron)?,
            prune: parse("AGROWATCH_PRUNE_CRON", &config.prune_cron)?,
            retention_days: config.retention_days,
            pass_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Spawn both loops. They run until the process exits.
    pub fn spawn(self) {
        let scheduler = Arc::new(self);
        tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.check_loop().await }
        });
        tokio::spawn(async move { scheduler.prune_loop().await });
    }

    async fn check_loop(&self) {
        loop {
            let Some(next) = self.check.upcoming(Utc).next() else {
                warn!("check schedule yields no future ticks, stopping");
                return;
            };
            sleep_until(next).await;
            let _guard = self.pass_lock.lock().await;
            match self.state.engine.run(Utc::now().date_naive()).await {
                Ok(summary) => {
                    *self.state.last_run.write().await = Some(summary);
                }
                Err(e) => error!(error = %e, "scheduled notification pass failed"),
            }
        }
    }

    async fn prune_loop(&self) {
        loop {
            let Some(next) = self.prune.upcoming(Utc).next() else {
                warn!("prune schedule yields no future ticks, stopping");
                return;
            };
            sleep_until(next).await;
            let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
            match self.state.store.prune_dispatches(cutoff).await {
                Ok(pruned) => info!(pruned, "dispatch history pruned"),
                Err(e) => error!(error = %e, "dispatch prune failed"),
            }
        }
    }
}

async fn sleep_until(when: chrono::DateTime<Utc>) {
    let now = Utc::now();
    if when > now {
        let wait = (when - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(0));
        tokio::time::sleep(wait).await;
    }
}
