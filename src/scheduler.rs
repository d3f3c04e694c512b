//! Per-block alert decisions, evaluated against an injectable clock.
//!
//! ARMED → FIRING → FIRED (for this minute) → ARMED
//!
//! A block fires when the wall clock's HH:MM equals its time, it has
//! outstanding items, and it has not already fired in this exact minute. The
//! fired guard is keyed on the date and minute, so it re-arms by itself once
//! the minute moves on. It is session-local: a restart within the same
//! minute as a fire will fire again.

use std::collections::HashMap;
use std::fmt;

use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use parking_lot::Mutex;
use tracing::info;

use crate::announcement::build_announcement_text;
use crate::schedule::{BlockTime, Schedule};

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

/// Calendar date plus HH:MM of a moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinuteStamp(NaiveDateTime);

impl MinuteStamp {
    pub fn of(now: NaiveDateTime) -> Self {
        let truncated = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        Self(truncated)
    }
}

impl fmt::Display for MinuteStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Armed,
    /// Already fired in the current minute.
    Fired,
}

/// A block that has just transitioned to FIRING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub block_id: String,
    pub time: BlockTime,
    pub text: String,
}

#[derive(Default)]
pub struct AlertScheduler {
    fired: HashMap<String, MinuteStamp>,
}

impl AlertScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide which blocks fire at `now` and mark them fired.
    pub fn evaluate(&mut self, schedule: &Schedule, now: NaiveDateTime) -> Vec<Alert> {
        let stamp = MinuteStamp::of(now);
        let wall = BlockTime::from_wall_clock(now.time());
        let mut alerts = Vec::new();

        for block in schedule.blocks().iter().filter(|b| b.time == wall) {
            if self.fired.get(&block.id) == Some(&stamp) {
                continue;
            }
            let text = build_announcement_text(block);
            if text.is_empty() {
                continue;
            }

            self.fired.insert(block.id.clone(), stamp);
            info!("Alert due for {} ({}) at {stamp}", block.id, block.time);
            alerts.push(Alert {
                block_id: block.id.clone(),
                time: block.time,
                text,
            });
        }

        alerts
    }

    pub fn state(&self, block_id: &str, now: NaiveDateTime) -> AlertState {
        match self.fired.get(block_id) {
            Some(stamp) if *stamp == MinuteStamp::of(now) => AlertState::Fired,
            _ => AlertState::Armed,
        }
    }

    /// Forget every fired marker, e.g. after a day rollover.
    pub fn rearm_all(&mut self) {
        self.fired.clear();
    }

    /// Drop markers for blocks that no longer exist.
    pub fn forget_missing(&mut self, schedule: &Schedule) {
        self.fired.retain(|id, _| schedule.block(id).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ChecklistItem, TimeBlock};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn schedule() -> Schedule {
        Schedule::new(vec![
            TimeBlock::new(
                "meds",
                "09:00".parse().unwrap(),
                vec![ChecklistItem::new("1", "Take medication")],
            ),
            TimeBlock::new(
                "done",
                "09:05".parse().unwrap(),
                vec![ChecklistItem {
                    id: "2".into(),
                    name: "Feed cat".into(),
                    is_completed: true,
                }],
            ),
        ])
    }

    #[test]
    fn test_fires_once_per_minute() {
        let mut scheduler = AlertScheduler::new();
        let schedule = schedule();

        assert!(scheduler.evaluate(&schedule, at(8, 59, 59)).is_empty());

        let alerts = scheduler.evaluate(&schedule, at(9, 0, 0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].text, "Time for 09:00. You need to: Take medication");
        assert_eq!(scheduler.state("meds", at(9, 0, 10)), AlertState::Fired);

        assert!(scheduler.evaluate(&schedule, at(9, 0, 30)).is_empty());
        assert!(scheduler.evaluate(&schedule, at(9, 1, 0)).is_empty());
        assert_eq!(scheduler.state("meds", at(9, 1, 0)), AlertState::Armed);
    }

    #[test]
    fn test_completed_block_never_fires() {
        let mut scheduler = AlertScheduler::new();
        let schedule = schedule();
        for s in [0, 20, 40] {
            assert!(scheduler.evaluate(&schedule, at(9, 5, s)).is_empty());
        }
        assert_eq!(scheduler.state("done", at(9, 5, 0)), AlertState::Armed);
    }

    #[test]
    fn test_next_day_fires_again() {
        let mut scheduler = AlertScheduler::new();
        let schedule = schedule();
        assert_eq!(scheduler.evaluate(&schedule, at(9, 0, 0)).len(), 1);
        let tomorrow = at(9, 0, 0) + TimeDelta::days(1);
        assert_eq!(scheduler.evaluate(&schedule, tomorrow).len(), 1);
    }

    #[test]
    fn test_rearm_and_forget() {
        let mut scheduler = AlertScheduler::new();
        let mut schedule = schedule();
        scheduler.evaluate(&schedule, at(9, 0, 0));

        scheduler.rearm_all();
        assert_eq!(scheduler.evaluate(&schedule, at(9, 0, 30)).len(), 1);

        schedule.replace(vec![]);
        scheduler.forget_missing(&schedule);
        assert_eq!(scheduler.state("meds", at(9, 0, 30)), AlertState::Armed);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(at(9, 0, 0));
        clock.advance(TimeDelta::seconds(90));
        assert_eq!(clock.now(), at(9, 1, 30));
        clock.set(at(7, 0, 0));
        assert_eq!(MinuteStamp::of(clock.now()).to_string(), "2024-03-04 07:00");
    }
}
