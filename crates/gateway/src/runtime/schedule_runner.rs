//! Schedule runner — the process-wide ticker that dispatches due cron
//! entries to a bounded worker pool.
//!
//! Firing is idempotent per (schedule, minute), overlap-guarded per
//! schedule, and quota-gated. Failed runs are logged and never retried;
//! missed ticks are not back-filled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bh_domain::stream::EventBody;
use bh_domain::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::runtime::inbox::InboxItem;
use crate::runtime::schedules::TriggerPayload;
use crate::runtime::turn;
use crate::state::AppState;

#[derive(Clone)]
pub struct ScheduleRunner {
    /// Schedules with a run in flight; overlapping fires are skipped.
    inflight: Arc<Mutex<HashSet<Uuid>>>,
    workers: Arc<Semaphore>,
}

impl ScheduleRunner {
    pub fn new(workers: usize) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashSet::new())),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Spawn the ticker loop. Missed ticks are skipped, not replayed.
    pub fn spawn(self, state: AppState) -> tokio::task::JoinHandle<()> {
        let tick_secs = state.config.schedule.tick_secs.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(tick_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.tick(&state, Utc::now()).await;
            }
        })
    }

    /// Evaluate due schedules at `now` and dispatch new fires.
    pub async fn tick(&self, state: &AppState, now: DateTime<Utc>) {
        for schedule in state.schedules.due(&now) {
            if schedule.quota_exhausted() {
                // Quota spent: make the disable durable and stop firing.
                if let Err(e) = state.schedules.disable(schedule.id) {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "disable failed");
                }
                continue;
            }

            // Idempotent per (schedule, fire minute).
            if !state.schedules.record_fire(schedule.id, &now) {
                continue;
            }

            // Concurrent fires of the same schedule are forbidden.
            if !self.inflight.lock().insert(schedule.id) {
                tracing::warn!(schedule_id = %schedule.id, "previous run still in flight, skipping");
                continue;
            }

            let state = state.clone();
            let inflight = self.inflight.clone();
            let workers = self.workers.clone();
            let schedule_id = schedule.id;
            tokio::spawn(async move {
                let _permit = match workers.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        inflight.lock().remove(&schedule_id);
                        return;
                    }
                };
                if let Err(e) = fire_schedule(state, schedule_id).await {
                    tracing::warn!(schedule_id = %schedule_id, error = %e, "scheduled run failed");
                }
                inflight.lock().remove(&schedule_id);
            });
        }
    }
}

/// One schedule fire: quota gate, token issuance, orchestrator trigger,
/// and success accounting. Shared by the ticker and the HTTP trigger
/// endpoint.
pub async fn fire_schedule(state: AppState, schedule_id: Uuid) -> Result<()> {
    let schedule = state.schedules.get(schedule_id)?;
    if !schedule.enabled {
        return Ok(());
    }
    if schedule.quota_exhausted() {
        state.schedules.disable(schedule_id)?;
        return Ok(());
    }

    tracing::info!(
        schedule_id = %schedule_id,
        name = %schedule.name,
        "triggering scheduled run"
    );

    let token = state.tokens.issue(schedule.owner_user_id)?;
    let payload = TriggerPayload::from(&schedule);
    let (_turn_id, mut rx) = turn::trigger_schedule(state.clone(), payload, token).await?;

    let mut final_content = String::new();
    let mut failed = false;
    while let Some(event) = rx.recv().await {
        match event.body {
            EventBody::Final { content } => final_content = content,
            EventBody::Error { message } => {
                final_content = format!("Error: {message}");
                failed = true;
            }
            _ => {}
        }
    }

    if failed {
        // No increment, no retry; the next matching tick tries again.
        return Err(Error::Transient(final_content));
    }

    state.schedules.record_success(schedule_id)?;
    state.inbox.push(InboxItem::new(
        schedule.bot_id,
        "schedule",
        format!("{}: {}", schedule.name, final_content),
    ));
    Ok(())
}
