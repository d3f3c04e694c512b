//! Speech synthesis: backends and the gateway that chains them.
//!
//! - `gateway`: ordered capability chain with one-time neural initialization
//! - `kokoro`: Kokoro ONNX neural synthesizer (returns WAV bytes)
//! - `native`: platform speech via the `tts` crate (live only, no bytes)
//! - `output`: rodio playback of prepared audio

pub mod gateway;
pub mod kokoro;
pub mod native;
pub mod output;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use gateway::{Capability, Readiness, SpeechGateway};

/// Rate/pitch as multipliers of the platform default, volume in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// Model-based synthesizer that needs a one-time download/load.
#[async_trait]
pub trait NeuralSynthesizer: Send + Sync {
    async fn model_present(&self) -> bool;

    async fn download_model(&self) -> Result<()>;

    async fn load(&self) -> Result<()>;

    /// Encoded audio (WAV) for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Platform speech. Completes when the utterance ends; never yields audio.
#[async_trait]
pub trait BaselineSpeaker: Send + Sync {
    async fn speak_live(&self, text: &str, params: VoiceParams) -> Result<()>;
}

/// Decoded-ready audio held by the cache or a live playback.
///
/// Clones share the same buffer, so a playback in progress keeps its audio
/// alive even if the cache releases the entry meanwhile.
#[derive(Clone)]
pub struct AudioHandle {
    bytes: Arc<[u8]>,
}

impl AudioHandle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn bytes(&self) -> Arc<[u8]> {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for AudioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioHandle").field("len", &self.len()).finish()
    }
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Check the bytes decode and wrap them in a playable handle.
    async fn prepare(&self, bytes: Vec<u8>) -> Result<AudioHandle>;

    /// Play to completion.
    async fn play(&self, handle: &AudioHandle) -> Result<()>;

    /// Give up the handle's resources.
    fn release(&self, handle: AudioHandle);
}
