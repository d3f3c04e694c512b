//! Audio output through rodio.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tracing::debug;

use super::{AudioHandle, AudioOutput};
use crate::error::{Result, SpeechError};

pub struct RodioOutput {
    // Kept alive for the process lifetime
    stream: OutputStream,
}

impl RodioOutput {
    pub fn open() -> Result<Self> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| SpeechError::Unsupported(format!("Failed to open audio output: {e}")))?;
        Ok(Self { stream })
    }
}

fn decoder(bytes: Arc<[u8]>) -> Result<Decoder<Cursor<Arc<[u8]>>>> {
    Decoder::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::Playback(format!("undecodable audio: {e}")))
}

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn prepare(&self, bytes: Vec<u8>) -> Result<AudioHandle> {
        let handle = AudioHandle::new(bytes);
        decoder(handle.bytes())?;
        Ok(handle)
    }

    async fn play(&self, handle: &AudioHandle) -> Result<()> {
        let source = decoder(handle.bytes())?;
        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(source);

        tokio::task::spawn_blocking(move || sink.sleep_until_end())
            .await
            .map_err(|e| SpeechError::Playback(format!("playback task failed: {e}")))
    }

    fn release(&self, handle: AudioHandle) {
        debug!("Released {} bytes of audio", handle.len());
    }
}

/// Stand-in when no output device exists. Everything fails as playback.
pub struct NoOutput;

#[async_trait]
impl AudioOutput for NoOutput {
    async fn prepare(&self, _bytes: Vec<u8>) -> Result<AudioHandle> {
        Err(SpeechError::Playback("no audio output device".into()))
    }

    async fn play(&self, _handle: &AudioHandle) -> Result<()> {
        Err(SpeechError::Playback("no audio output device".into()))
    }

    fn release(&self, _handle: AudioHandle) {}
}
