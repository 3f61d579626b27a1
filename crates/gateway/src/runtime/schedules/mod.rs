//! Schedule engine data layer: model, cron evaluation, and the store.

pub mod cron;
pub mod model;
pub mod store;

pub use cron::{cron_matches, cron_next, cron_next_tz, parse_tz, validate_pattern};
pub use model::{Schedule, TriggerPayload};
pub use store::ScheduleStore;
