//! Fake speech backends with call counters and scripted failures.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;

use morning_tasks::cache::AnnouncementCache;
use morning_tasks::schedule::{ChecklistItem, TimeBlock};
use morning_tasks::speech::{
    AudioHandle, AudioOutput, BaselineSpeaker, NeuralSynthesizer, SpeechGateway, VoiceParams,
};
use morning_tasks::{Result, SpeechError};

#[derive(Default)]
pub struct FakeNeural {
    pub calls: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
    /// Failures returned by the next synthesize calls, in order.
    pub failures: Mutex<VecDeque<SpeechError>>,
}

impl FakeNeural {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, error: SpeechError) {
        self.failures.lock().push_back(error);
    }
}

#[async_trait]
impl NeuralSynthesizer for FakeNeural {
    async fn model_present(&self) -> bool {
        true
    }

    async fn download_model(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().push(text.to_string());
        if let Some(e) = self.failures.lock().pop_front() {
            return Err(e);
        }
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Default)]
pub struct FakeBaseline {
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl BaselineSpeaker for FakeBaseline {
    async fn speak_live(&self, text: &str, _params: VoiceParams) -> Result<()> {
        self.spoken.lock().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOutput {
    pub played: Mutex<Vec<String>>,
    pub released: AtomicUsize,
    /// Number of upcoming plays that fail.
    pub broken_plays: AtomicUsize,
}

impl FakeOutput {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn prepare(&self, bytes: Vec<u8>) -> Result<AudioHandle> {
        Ok(AudioHandle::new(bytes))
    }

    async fn play(&self, handle: &AudioHandle) -> Result<()> {
        let remaining = self.broken_plays.load(Ordering::SeqCst);
        if remaining > 0 {
            self.broken_plays.store(remaining - 1, Ordering::SeqCst);
            return Err(SpeechError::Playback("decoder error".into()));
        }
        let text = String::from_utf8_lossy(&handle.bytes()).into_owned();
        self.played.lock().push(text);
        Ok(())
    }

    fn release(&self, _handle: AudioHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub neural: Arc<FakeNeural>,
    pub baseline: Arc<FakeBaseline>,
    pub output: Arc<FakeOutput>,
    pub cache: Arc<AnnouncementCache>,
}

pub fn harness() -> Harness {
    let neural = Arc::new(FakeNeural::default());
    let baseline = Arc::new(FakeBaseline::default());
    let output = Arc::new(FakeOutput::default());
    let gateway = SpeechGateway::new(output.clone(), VoiceParams::default())
        .with_neural(neural.clone())
        .with_baseline(baseline.clone());
    let cache = Arc::new(AnnouncementCache::new(Arc::new(gateway)));
    Harness {
        neural,
        baseline,
        output,
        cache,
    }
}

pub fn block(id: &str, time: &str, items: &[(&str, bool)]) -> TimeBlock {
    let items = items
        .iter()
        .enumerate()
        .map(|(i, (name, done))| ChecklistItem {
            id: format!("{id}-{i}"),
            name: name.to_string(),
            is_completed: *done,
        })
        .collect();
    TimeBlock::new(id, time.parse().unwrap(), items)
}

pub fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 10, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}
