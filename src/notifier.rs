//! Desktop notifications shown beside spoken alerts.

use notify_rust::{Notification, Timeout};
use tracing::{debug, warn};

use crate::history::DayHistoryRecord;
use crate::scheduler::Alert;

const APP_NAME: &str = "morning-tasks";

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Toast carrying the same text that is about to be spoken.
    pub fn alert(&self, alert: &Alert) {
        self.show(
            &format!("Time for {}", alert.time),
            &alert.text,
            "appointment-soon",
            Timeout::Milliseconds(10_000),
        );
    }

    pub fn day_closed(&self, record: &DayHistoryRecord) {
        let body = if record.completed {
            "Everything on the checklist was done."
        } else {
            "Some items were left open."
        };
        self.show(
            &format!("Checklist for {}", record.date.format("%A %-d %B")),
            body,
            "x-office-calendar",
            Timeout::Milliseconds(5_000),
        );
    }

    fn show(&self, summary: &str, body: &str, icon: &str, timeout: Timeout) {
        if !self.enabled {
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .appname(APP_NAME)
            .summary(summary)
            .body(body)
            .icon(icon)
            .timeout(timeout)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
