//! Checklist model: time blocks, their items, and the sorted schedule.
//!
//! Structure editing lives outside this crate; the schedule is loaded from a
//! JSON file and only completion flags are mutated here.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ScheduleError;

/// Time of day a block is anchored to, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockTime(NaiveTime);

impl BlockTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// Truncates seconds so a wall-clock time can be compared with a block.
    pub fn from_wall_clock(time: NaiveTime) -> Self {
        Self(time.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(time))
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for BlockTime {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))?;
        if h.len() != 2 || m.len() != 2 {
            return Err(ScheduleError::InvalidTime(s.to_string()));
        }
        let hour: u32 = h.parse().map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
        let minute: u32 = m.parse().map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
        Self::new(hour, minute).ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))
    }
}

impl fmt::Display for BlockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for BlockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_completed: bool,
}

impl ChecklistItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: String,
    pub time: BlockTime,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

impl TimeBlock {
    pub fn new(id: impl Into<String>, time: BlockTime, items: Vec<ChecklistItem>) -> Self {
        Self {
            id: id.into(),
            time,
            items,
        }
    }

    pub fn has_incomplete(&self) -> bool {
        self.items.iter().any(|item| !item.is_completed)
    }

    pub fn all_completed(&self) -> bool {
        self.items.iter().all(|item| item.is_completed)
    }
}

/// Time blocks ordered by time ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TimeBlock>", into = "Vec<TimeBlock>")]
pub struct Schedule {
    blocks: Vec<TimeBlock>,
}

impl From<Vec<TimeBlock>> for Schedule {
    fn from(blocks: Vec<TimeBlock>) -> Self {
        let mut schedule = Self { blocks };
        schedule.sort();
        schedule
    }
}

impl From<Schedule> for Vec<TimeBlock> {
    fn from(schedule: Schedule) -> Self {
        schedule.blocks
    }
}

impl Schedule {
    pub fn new(blocks: Vec<TimeBlock>) -> Self {
        Self::from(blocks)
    }

    /// Load a schedule from a JSON array of time blocks.
    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let contents = std::fs::read_to_string(path)?;
        let blocks: Vec<TimeBlock> = serde_json::from_str(&contents)?;
        Ok(Self::new(blocks))
    }

    pub fn blocks(&self) -> &[TimeBlock] {
        &self.blocks
    }

    pub fn block(&self, id: &str) -> Option<&TimeBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The latest block of the day, which anchors the rollover.
    pub fn last_block(&self) -> Option<&TimeBlock> {
        self.blocks.last()
    }

    pub fn replace(&mut self, blocks: Vec<TimeBlock>) {
        self.blocks = blocks;
        self.sort();
    }

    /// Returns false if the block or item does not exist.
    pub fn set_completed(&mut self, block_id: &str, item_id: &str, completed: bool) -> bool {
        let Some(item) = self
            .blocks
            .iter_mut()
            .find(|b| b.id == block_id)
            .and_then(|b| b.items.iter_mut().find(|i| i.id == item_id))
        else {
            return false;
        };
        item.is_completed = completed;
        true
    }

    pub fn reset_completion(&mut self) {
        for item in self.blocks.iter_mut().flat_map(|b| b.items.iter_mut()) {
            item.is_completed = false;
        }
    }

    // Stable, so blocks sharing a time keep insertion order.
    fn sort(&mut self) {
        self.blocks.sort_by(|a, b| a.time.cmp(&b.time));
    }
}
