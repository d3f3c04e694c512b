//! Platform speech fallback using the `tts` crate.
//!
//! Uses Speech Dispatcher on Linux, AVFoundation on macOS, SAPI/WinRT on
//! Windows. The platform handle is not `Send` everywhere, so it lives on a
//! dedicated thread and requests arrive over a channel.

use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use tts::Tts;

use super::{BaselineSpeaker, VoiceParams};
use crate::error::{Result, SpeechError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_UTTERANCE: Duration = Duration::from_secs(120);

struct LiveRequest {
    text: String,
    params: VoiceParams,
    reply: oneshot::Sender<Result<()>>,
}

pub struct NativeSpeaker {
    tx: mpsc::UnboundedSender<LiveRequest>,
}

impl NativeSpeaker {
    /// Spawn the speech thread. Platform failures surface per request as
    /// `Unsupported`, not here.
    pub fn start() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<LiveRequest>();

        thread::Builder::new()
            .name("platform-speech".into())
            .spawn(move || {
                let mut tts = match Tts::default() {
                    Ok(tts) => {
                        info!("Platform speech ready");
                        Some(tts)
                    }
                    Err(e) => {
                        warn!("Platform speech unavailable: {e}");
                        None
                    }
                };

                while let Some(request) = rx.blocking_recv() {
                    let result = match tts.as_mut() {
                        Some(tts) => speak_blocking(tts, &request.text, request.params),
                        None => Err(SpeechError::Unsupported("platform speech unavailable".into())),
                    };
                    let _ = request.reply.send(result);
                }
                debug!("Platform speech thread exiting");
            })?;

        Ok(Self { tx })
    }
}

#[async_trait]
impl BaselineSpeaker for NativeSpeaker {
    async fn speak_live(&self, text: &str, params: VoiceParams) -> Result<()> {
        let (reply, done) = oneshot::channel();
        let request = LiveRequest {
            text: text.to_string(),
            params,
            reply,
        };
        self.tx
            .send(request)
            .map_err(|_| SpeechError::Unsupported("platform speech thread stopped".into()))?;
        done.await
            .map_err(|_| SpeechError::Unsupported("platform speech thread stopped".into()))?
    }
}

fn speak_blocking(tts: &mut Tts, text: &str, params: VoiceParams) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let speech_err = |e: tts::Error| SpeechError::Synthesis(e.to_string());
    let features = tts.supported_features();

    if features.rate {
        let rate = scale(params.rate, tts.min_rate(), tts.normal_rate(), tts.max_rate());
        tts.set_rate(rate).map_err(speech_err)?;
    }
    if features.pitch {
        let pitch = scale(params.pitch, tts.min_pitch(), tts.normal_pitch(), tts.max_pitch());
        tts.set_pitch(pitch).map_err(speech_err)?;
    }
    if features.volume {
        let (min, max) = (tts.min_volume(), tts.max_volume());
        tts.set_volume(min + params.volume.clamp(0.0, 1.0) * (max - min))
            .map_err(speech_err)?;
    }

    debug!("Speaking: {text}");
    tts.speak(text, false).map_err(speech_err)?;

    if !features.is_speaking {
        // No way to observe the end; dispatch is all we can report
        return Ok(());
    }

    let started = Instant::now();
    thread::sleep(POLL_INTERVAL);
    while tts.is_speaking().map_err(speech_err)? {
        if started.elapsed() > MAX_UTTERANCE {
            let _ = tts.stop();
            return Err(SpeechError::Synthesis("utterance did not finish".into()));
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

/// Map a multiplier of the default (1.0) onto a platform's min..max range.
fn scale(multiplier: f32, min: f32, normal: f32, max: f32) -> f32 {
    let value = if multiplier >= 1.0 {
        normal + (multiplier - 1.0) * (max - normal)
    } else {
        normal - (1.0 - multiplier) * (normal - min)
    };
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale() {
        assert_eq!(scale(1.0, 0.0, 1.0, 3.0), 1.0);
        assert_eq!(scale(2.0, 0.0, 1.0, 3.0), 3.0);
        assert_eq!(scale(0.5, 0.0, 1.0, 3.0), 0.5);
        assert_eq!(scale(0.0, 0.1, 1.0, 3.0), 0.1);
        assert_eq!(scale(5.0, 0.0, 1.0, 3.0), 3.0);
    }

    #[tokio::test]
    async fn test_start_native_speaker() {
        // May have no platform speech in CI; either outcome must not panic
        let speaker = NativeSpeaker::start().unwrap();
        match speaker.speak_live("", VoiceParams::default()).await {
            Ok(()) => println!("✓ Platform speech available"),
            Err(e) => println!("⚠ Platform speech unavailable (may be expected in CI): {e}"),
        }
    }
}
