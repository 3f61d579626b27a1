//! ScheduleStore — schedule rows plus the per-minute fire record that
//! makes dispatch idempotent.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use bh_domain::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::cron::{cron_matches_tz, parse_tz, validate_pattern};
use super::model::Schedule;

pub struct ScheduleStore {
    inner: RwLock<HashMap<Uuid, Schedule>>,
    /// (schedule id, minute timestamp) pairs already dispatched.
    fired: Mutex<HashSet<(Uuid, i64)>>,
    persist_path: Option<PathBuf>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ScheduleStore {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            fired: Mutex::new(HashSet::new()),
            persist_path: None,
        }
    }

    pub fn with_persistence(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("schedules.json");
        let mut store = Self {
            inner: RwLock::new(HashMap::new()),
            fired: Mutex::new(HashSet::new()),
            persist_path: Some(persist_path),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Some(path) = &self.persist_path else { return };
        if let Ok(data) = std::fs::read_to_string(path) {
            if let Ok(schedules) = serde_json::from_str::<Vec<Schedule>>(&data) {
                let mut map = HashMap::new();
                for s in schedules {
                    map.insert(s.id, s);
                }
                let count = map.len();
                self.inner = RwLock::new(map);
                if count > 0 {
                    tracing::info!(count, "loaded schedules from disk");
                }
            }
        }
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else { return };
        let schedules: Vec<Schedule> = self.inner.read().values().cloned().collect();
        if let Ok(json) = serde_json::to_string_pretty(&schedules) {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(path, json) {
                tracing::warn!(error = %e, "failed to persist schedules");
            }
        }
    }

    pub fn insert(&self, schedule: Schedule) -> Result<Schedule> {
        validate_pattern(&schedule.pattern)?;
        if schedule.command.trim().is_empty() {
            return Err(Error::Validation("schedule command is empty".into()));
        }
        self.inner.write().insert(schedule.id, schedule.clone());
        self.persist();
        Ok(schedule)
    }

    pub fn get(&self, id: Uuid) -> Result<Schedule> {
        self.inner
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("schedule {id}")))
    }

    pub fn list(&self) -> Vec<Schedule> {
        self.inner.read().values().cloned().collect()
    }

    pub fn for_bot(&self, bot_id: Uuid) -> Vec<Schedule> {
        self.inner
            .read()
            .values()
            .filter(|s| s.bot_id == bot_id)
            .cloned()
            .collect()
    }

    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut Schedule)) -> Result<Schedule> {
        let updated = {
            let mut map = self.inner.write();
            let schedule = map
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
            f(schedule);
            schedule.updated_at = Utc::now();
            schedule.clone()
        };
        self.persist();
        Ok(updated)
    }

    pub fn remove(&self, id: Uuid) -> Result<Schedule> {
        let removed = self
            .inner
            .write()
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
        self.persist();
        Ok(removed)
    }

    /// Remove every schedule of a bot (deletion cascade).
    pub fn remove_bot(&self, bot_id: Uuid) {
        self.inner.write().retain(|_, s| s.bot_id != bot_id);
        self.persist();
    }

    pub fn disable(&self, id: Uuid) -> Result<Schedule> {
        self.update(id, |s| s.enabled = false)
    }

    /// Enabled schedules whose pattern matches `now` in their timezone.
    pub fn due(&self, now: &DateTime<Utc>) -> Vec<Schedule> {
        self.inner
            .read()
            .values()
            .filter(|s| s.enabled && cron_matches_tz(&s.pattern, now, parse_tz(&s.timezone)))
            .cloned()
            .collect()
    }

    /// Record a dispatch for (schedule, fire minute). Returns true the
    /// first time; later calls inside the same minute return false, which
    /// is what makes firing idempotent per (schedule_id, fire_time).
    pub fn record_fire(&self, id: Uuid, now: &DateTime<Utc>) -> bool {
        let minute = now.timestamp() / 60;
        let mut fired = self.fired.lock();
        // Bound the record: entries older than an hour can never fire again.
        if fired.len() > 10_000 {
            let cutoff = minute - 60;
            fired.retain(|(_, m)| *m >= cutoff);
        }
        fired.insert((id, minute))
    }

    /// Record a successful run: bump the counter and disable the schedule
    /// when a bounded quota is spent.
    pub fn record_success(&self, id: Uuid) -> Result<Schedule> {
        self.update(id, |s| {
            s.current_calls = s.current_calls.saturating_add(1);
            s.last_fired_at = Some(Utc::now());
            if matches!(s.max_calls, Some(max) if s.current_calls >= max) {
                s.enabled = false;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule() -> Schedule {
        Schedule::new(Uuid::new_v4(), Uuid::new_v4(), "ping", "* * * * *", "ping")
    }

    #[test]
    fn insert_validates_pattern() {
        let store = ScheduleStore::in_memory();
        let mut bad = schedule();
        bad.pattern = "not cron".into();
        assert!(store.insert(bad).is_err());
        store.insert(schedule()).unwrap();
    }

    #[test]
    fn due_respects_enabled_and_pattern() {
        let store = ScheduleStore::in_memory();
        let s = store.insert(schedule()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert_eq!(store.due(&now).len(), 1);

        store.disable(s.id).unwrap();
        assert!(store.due(&now).is_empty());
    }

    #[test]
    fn record_fire_is_idempotent_per_minute() {
        let store = ScheduleStore::in_memory();
        let s = store.insert(schedule()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 5).unwrap();
        let t0_later = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 40).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 1, 0).unwrap();

        assert!(store.record_fire(s.id, &t0));
        assert!(!store.record_fire(s.id, &t0_later), "same minute, no refire");
        assert!(store.record_fire(s.id, &t1), "next minute fires again");
    }

    #[test]
    fn success_under_quota_disables_at_limit() {
        let store = ScheduleStore::in_memory();
        let mut s = schedule();
        s.max_calls = Some(2);
        s.current_calls = 1;
        let s = store.insert(s).unwrap();

        let after = store.record_success(s.id).unwrap();
        assert_eq!(after.current_calls, 2);
        assert!(!after.enabled, "quota spent, schedule disabled");
        assert!(after.quota_exhausted());
    }

    #[test]
    fn unbounded_schedule_never_disables() {
        let store = ScheduleStore::in_memory();
        let s = store.insert(schedule()).unwrap();
        for _ in 0..5 {
            store.record_success(s.id).unwrap();
        }
        let after = store.get(s.id).unwrap();
        assert!(after.enabled);
        assert_eq!(after.current_calls, 5);
    }

    #[test]
    fn persistence_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = ScheduleStore::with_persistence(dir.path());
            store.insert(schedule()).unwrap().id
        };
        let reloaded = ScheduleStore::with_persistence(dir.path());
        assert_eq!(reloaded.get(id).unwrap().name, "ping");
    }
}
