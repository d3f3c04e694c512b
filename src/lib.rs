//! morning-tasks-rs: spoken reminders for time-anchored checklists.
//!
//! At each block's time the outstanding items are announced through a
//! neural synthesizer (Kokoro) with platform speech as fallback. Synthesized
//! audio is cached by announcement text. Completion resets after the day's
//! last block, and the day's outcome goes to a history log.

pub mod announcement;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod notifier;
pub mod rollover;
pub mod schedule;
pub mod scheduler;
pub mod service;
pub mod speech;

pub use error::{Result, ScheduleError, SpeechError};
