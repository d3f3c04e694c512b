//! Day history and completion reporting.
//!
//! One record per day, written at rollover. The file store is an append-only
//! JSONL log; when read back, the last line for a date wins.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use chrono::{NaiveDate, TimeDelta};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHistoryRecord {
    pub date: NaiveDate,
    pub completed: bool,
}

pub trait HistoryStore: Send + Sync {
    /// Append or overwrite the record for its date.
    fn record(&self, record: &DayHistoryRecord) -> std::io::Result<()>;

    /// All records, one per date, oldest first.
    fn load(&self) -> Vec<DayHistoryRecord>;
}

fn latest_per_date(records: impl IntoIterator<Item = DayHistoryRecord>) -> Vec<DayHistoryRecord> {
    let by_date: BTreeMap<NaiveDate, bool> =
        records.into_iter().map(|r| (r.date, r.completed)).collect();
    by_date
        .into_iter()
        .map(|(date, completed)| DayHistoryRecord { date, completed })
        .collect()
}

pub struct JsonlHistoryStore {
    path: PathBuf,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn record(&self, record: &DayHistoryRecord) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        debug!("Saved day record to {}", self.path.display());
        Ok(())
    }

    fn load(&self) -> Vec<DayHistoryRecord> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Vec::new();
        };

        let records = std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(&line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed history line: {e}");
                    None
                }
            });
        latest_per_date(records)
    }
}

/// In-process store; also counts writes.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<DayHistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.records.lock().len()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn record(&self, record: &DayHistoryRecord) -> std::io::Result<()> {
        self.records.lock().push(*record);
        Ok(())
    }

    fn load(&self) -> Vec<DayHistoryRecord> {
        latest_per_date(self.records.lock().iter().copied())
    }
}

/// Percentage of completed days within the `days` ending at `today`.
pub fn completion_rate(records: &[DayHistoryRecord], today: NaiveDate, days: i64) -> Option<f64> {
    let since = today - TimeDelta::days(days);
    let window: Vec<_> = records
        .iter()
        .filter(|r| r.date > since && r.date <= today)
        .collect();
    if window.is_empty() {
        return None;
    }
    let completed = window.iter().filter(|r| r.completed).count();
    Some(completed as f64 * 100.0 / window.len() as f64)
}

/// Markdown completion report.
pub fn generate_report(records: &[DayHistoryRecord], today: NaiveDate) -> String {
    if records.is_empty() {
        return format!("# Morning Tasks Report - {today}\n\nNo days recorded yet.");
    }

    let rate = |days| match completion_rate(records, today, days) {
        Some(pct) => format!("{pct:.1}%"),
        None => "-".to_string(),
    };

    let mut lines = vec![
        format!("# Morning Tasks Report - {today}"),
        String::new(),
        "## Completion".to_string(),
        format!("- **Last 7 days**: {}", rate(7)),
        format!("- **Last 30 days**: {}", rate(30)),
        format!("- **Days recorded**: {}", records.len()),
        String::new(),
        "## Recent Days".to_string(),
        String::new(),
        "| Date | Completed |".to_string(),
        "|------|-----------|".to_string(),
    ];

    for r in records.iter().rev().take(14) {
        let mark = if r.completed { "yes" } else { "no" };
        lines.push(format!("| {} | {mark} |", r.date));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_jsonl_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("nested/history.jsonl"));
        assert!(store.load().is_empty());

        store.record(&DayHistoryRecord { date: day(2), completed: false }).unwrap();
        store.record(&DayHistoryRecord { date: day(1), completed: true }).unwrap();
        store.record(&DayHistoryRecord { date: day(2), completed: true }).unwrap();

        let records = store.load();
        assert_eq!(
            records,
            vec![
                DayHistoryRecord { date: day(1), completed: true },
                DayHistoryRecord { date: day(2), completed: true },
            ]
        );
    }

    #[test]
    fn test_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        fs::write(&path, "{\"date\":\"2024-05-03\",\"completed\":true}\nnot json\n\n").unwrap();
        let records = JsonlHistoryStore::new(&path).load();
        assert_eq!(records, vec![DayHistoryRecord { date: day(3), completed: true }]);
    }

    #[test]
    fn test_completion_rate_window() {
        let records: Vec<_> = (1..=10)
            .map(|d| DayHistoryRecord { date: day(d), completed: d % 2 == 0 })
            .collect();
        // 4..=10 → 5,7,9 incomplete; 4,6,8,10 complete
        let weekly = completion_rate(&records, day(10), 7).unwrap();
        assert!((weekly - 400.0 / 7.0).abs() < 1e-9);
        assert_eq!(completion_rate(&records, day(30), 7), None);
    }

    #[test]
    fn test_report() {
        let records = vec![
            DayHistoryRecord { date: day(1), completed: true },
            DayHistoryRecord { date: day(2), completed: false },
        ];
        let report = generate_report(&records, day(2));
        assert!(report.contains("**Last 7 days**: 50.0%"));
        assert!(report.contains("| 2024-05-02 | no |"));
        assert!(generate_report(&[], day(2)).contains("No days recorded"));
    }
}
