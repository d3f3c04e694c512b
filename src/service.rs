//! Alert service: the tick loop tying schedule, rollover, alerts and audio.
//!
//! Every tick runs the rollover check before alert evaluation, so a day
//! boundary and a same-tick alert never see half-reset state. Announcements
//! run on spawned tasks; once dispatched they are never cancelled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::announcement::build_announcement_text;
use crate::cache::{AnnouncementCache, Announced};
use crate::history::DayHistoryRecord;
use crate::notifier::Notifier;
use crate::rollover::DayRollover;
use crate::schedule::{Schedule, TimeBlock};
use crate::scheduler::{Alert, AlertScheduler, Clock, MinuteStamp};

/// Changes pushed by whoever owns the checklist.
#[derive(Debug, Clone)]
pub enum ScheduleUpdate {
    Replace(Vec<TimeBlock>),
    SetCompleted {
        block_id: String,
        item_id: String,
        completed: bool,
    },
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub rollover: Option<DayHistoryRecord>,
    pub alerts: Vec<Alert>,
}

pub struct AlertService {
    schedule: Schedule,
    scheduler: AlertScheduler,
    rollover: DayRollover,
    cache: Arc<AnnouncementCache>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    preload_lead: TimeDelta,
    last_preload: Option<MinuteStamp>,
    announcements: JoinSet<Announced>,
    preloads: JoinSet<()>,
}

impl AlertService {
    pub fn new(
        schedule: Schedule,
        cache: Arc<AnnouncementCache>,
        rollover: DayRollover,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedule,
            scheduler: AlertScheduler::new(),
            rollover,
            cache,
            clock,
            notifier: Notifier::disabled(),
            preload_lead: TimeDelta::minutes(15),
            last_preload: None,
            announcements: JoinSet::new(),
            preloads: JoinSet::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_preload_lead(mut self, minutes: i64) -> Self {
        self.preload_lead = TimeDelta::minutes(minutes);
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn apply(&mut self, update: ScheduleUpdate) {
        match update {
            ScheduleUpdate::Replace(blocks) => {
                self.schedule.replace(blocks);
                self.scheduler.forget_missing(&self.schedule);

                let texts: HashSet<String> = self
                    .schedule
                    .blocks()
                    .iter()
                    .map(build_announcement_text)
                    .filter(|t| !t.is_empty())
                    .collect();
                self.cache.retain_texts(&texts);
                info!("Schedule replaced: {} time blocks", self.schedule.blocks().len());
            }
            ScheduleUpdate::SetCompleted {
                block_id,
                item_id,
                completed,
            } => {
                if !self.schedule.set_completed(&block_id, &item_id, completed) {
                    warn!("No item {item_id} in block {block_id}");
                }
            }
        }
        // Outstanding text may have changed
        self.last_preload = None;
    }

    /// Evaluate the schedule at the current clock time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();

        let rollover = self.rollover.check(&mut self.schedule, now);
        if let Some(record) = &rollover {
            self.notifier.day_closed(record);
            self.scheduler.rearm_all();
            self.last_preload = None;
        }

        let alerts = self.scheduler.evaluate(&self.schedule, now);
        for alert in &alerts {
            self.dispatch(alert);
        }

        let stamp = MinuteStamp::of(now);
        if self.last_preload != Some(stamp) {
            self.last_preload = Some(stamp);
            self.preload_upcoming(now);
        }

        TickReport { rollover, alerts }
    }

    fn dispatch(&mut self, alert: &Alert) {
        let Some(block) = self.schedule.block(&alert.block_id).cloned() else {
            return;
        };
        self.notifier.alert(alert);

        let cache = self.cache.clone();
        self.announcements.spawn(async move { cache.play(&block).await });
    }

    fn preload_upcoming(&mut self, now: chrono::NaiveDateTime) {
        for block in self.schedule.blocks() {
            // Next occurrence, which is tomorrow once today's has passed
            let mut due = now.date().and_time(block.time.as_naive());
            if due <= now {
                due += TimeDelta::days(1);
            }
            let until = due - now;
            if until > self.preload_lead || !block.has_incomplete() {
                continue;
            }

            debug!("Preloading announcement for {}", block.time);
            let cache = self.cache.clone();
            let block = block.clone();
            self.preloads.spawn(async move { cache.preload(&block).await });
        }
    }

    /// Wait for every dispatched announcement and preload to finish.
    pub async fn settle(&mut self) -> Vec<Announced> {
        while self.preloads.join_next().await.is_some() {}

        let mut outcomes = Vec::new();
        while let Some(joined) = self.announcements.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Announcement task failed: {e}"),
            }
        }
        outcomes
    }

    pub async fn run(&mut self, tick: Duration, mut updates: mpsc::Receiver<ScheduleUpdate>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Alert service ready: {} time blocks",
            self.schedule.blocks().len()
        );

        loop {
            tokio::select! {
                update = updates.recv() => {
                    match update {
                        Some(update) => self.apply(update),
                        None => {
                            info!("Schedule updates closed");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.tick();
                }
                Some(joined) = self.announcements.join_next(), if !self.announcements.is_empty() => {
                    match joined {
                        Ok(outcome) => debug!("Announcement finished: {outcome:?}"),
                        Err(e) => warn!("Announcement task failed: {e}"),
                    }
                }
                Some(_) = self.preloads.join_next(), if !self.preloads.is_empty() => {}
            }
        }
    }

    /// Let in-flight announcements finish, then release all cached audio.
    pub async fn shutdown(mut self) {
        self.preloads.abort_all();
        self.settle().await;
        self.cache.clear(None);
        info!("Alert service stopped");
    }
}
