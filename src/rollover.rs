//! Day rollover: archive the day's outcome and reset completion.
//!
//! Fires once the wall clock passes the last block of the day. The day
//! counts as completed iff every item of that last block is done. Runs at
//! most once per date; a day whose rollover was missed (last block at 23:59,
//! or the machine asleep) is closed out on the first tick of the next day.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::history::{DayHistoryRecord, HistoryStore};
use crate::schedule::{BlockTime, Schedule};

pub struct DayRollover {
    store: Arc<dyn HistoryStore>,
    last_processed: Option<NaiveDate>,
    last_seen: Option<NaiveDate>,
}

impl DayRollover {
    /// Resumes from the newest date already in the store.
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        let last_processed = store.load().last().map(|r| r.date);
        Self {
            store,
            last_processed,
            last_seen: None,
        }
    }

    pub fn last_processed(&self) -> Option<NaiveDate> {
        self.last_processed
    }

    /// Run the rollover if due. Returns the record written, if any.
    pub fn check(&mut self, schedule: &mut Schedule, now: NaiveDateTime) -> Option<DayHistoryRecord> {
        let today = now.date();
        let previous_day = self.last_seen.replace(today).filter(|d| *d < today);

        if let Some(day) = previous_day {
            if !matches!(self.last_processed, Some(p) if p >= day) && !schedule.is_empty() {
                info!("Closing out {day}, its rollover was missed");
                return Some(self.roll(schedule, day));
            }
        }

        let last = schedule.last_block()?;
        if self.last_processed.is_some_and(|p| p >= today) {
            return None;
        }
        if BlockTime::from_wall_clock(now.time()) <= last.time {
            return None;
        }

        Some(self.roll(schedule, today))
    }

    fn roll(&mut self, schedule: &mut Schedule, date: NaiveDate) -> DayHistoryRecord {
        let completed = schedule.last_block().is_some_and(|b| b.all_completed());
        let record = DayHistoryRecord { date, completed };

        if let Err(e) = self.store.record(&record) {
            warn!("Failed to save day record for {date}: {e}");
        }
        schedule.reset_completion();
        self.last_processed = Some(date);

        info!(
            "Day rollover for {date}: {}",
            if completed { "completed" } else { "not completed" }
        );
        record
    }
}
