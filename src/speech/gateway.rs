//! Uniform speak/synthesize contract over the neural and baseline backends.
//!
//! Fallback is an ordered chain of capabilities. Each attempt is tagged:
//! `Spoken`, `Retryable` (this call failed, try the next capability) or
//! `Permanent` (the capability is unusable for this process). Neural
//! initialization runs once; concurrent callers await the same attempt.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{AudioOutput, BaselineSpeaker, NeuralSynthesizer, VoiceParams};
use crate::error::{Result, SpeechError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Neural,
    Baseline,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neural => write!(f, "neural"),
            Self::Baseline => write!(f, "baseline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Attempt {
    Spoken,
    Retryable(SpeechError),
    Permanent(SpeechError),
}

const CHAIN: [Capability; 2] = [Capability::Neural, Capability::Baseline];

pub struct SpeechGateway {
    neural: Option<Arc<dyn NeuralSynthesizer>>,
    baseline: Option<Arc<dyn BaselineSpeaker>>,
    output: Arc<dyn AudioOutput>,
    params: VoiceParams,
    readiness: OnceCell<Readiness>,
}

impl SpeechGateway {
    pub fn new(output: Arc<dyn AudioOutput>, params: VoiceParams) -> Self {
        Self {
            neural: None,
            baseline: None,
            output,
            params,
            readiness: OnceCell::new(),
        }
    }

    pub fn with_neural(mut self, neural: Arc<dyn NeuralSynthesizer>) -> Self {
        self.neural = Some(neural);
        self
    }

    pub fn with_baseline(mut self, baseline: Arc<dyn BaselineSpeaker>) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    /// Bring the neural backend up, at most once per gateway.
    pub async fn initialize(&self) -> Readiness {
        *self.readiness.get_or_init(|| self.init_neural()).await
    }

    /// Whether a previous initialization succeeded. Never starts one.
    pub fn is_neural_ready(&self) -> bool {
        self.readiness.get() == Some(&Readiness::Ready)
    }

    async fn init_neural(&self) -> Readiness {
        let Some(neural) = &self.neural else {
            info!("No neural synthesizer configured, using baseline speech only");
            return Readiness::Failed;
        };

        match bring_up(neural.as_ref()).await {
            Ok(()) => {
                info!("Neural synthesizer ready");
                Readiness::Ready
            }
            Err(e) => {
                warn!("{e}; falling back to baseline speech for this session");
                Readiness::Failed
            }
        }
    }

    /// Synthesize audio bytes without playing them.
    ///
    /// Only the neural backend can capture audio, so baseline-only mode fails
    /// with `Unsupported` instead of degrading.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let neural = match (&self.neural, self.initialize().await) {
            (Some(neural), Readiness::Ready) => neural,
            _ => {
                return Err(SpeechError::Unsupported(
                    "audio capture unsupported without the neural synthesizer".into(),
                ))
            }
        };

        neural.synthesize(text).await.map_err(|e| match e {
            SpeechError::Synthesis(_) => e,
            other => SpeechError::Synthesis(other.to_string()),
        })
    }

    /// Speak `text` now, walking the capability chain until one succeeds.
    pub async fn speak(&self, text: &str) -> Result<Capability> {
        self.speak_via(&CHAIN, text).await
    }

    /// Speak `text` now, skipping the neural capability.
    pub async fn speak_baseline(&self, text: &str) -> Result<Capability> {
        self.speak_via(&CHAIN[1..], text).await
    }

    async fn speak_via(&self, chain: &[Capability], text: &str) -> Result<Capability> {
        let mut last_error = SpeechError::Unsupported("no speech capability available".into());

        for &capability in chain {
            match self.attempt(capability, text).await {
                Attempt::Spoken => {
                    debug!("Spoke via {capability} synthesizer");
                    return Ok(capability);
                }
                Attempt::Retryable(e) => {
                    warn!("{capability} speech failed, trying next: {e}");
                    last_error = e;
                }
                Attempt::Permanent(e) => {
                    debug!("{capability} speech unavailable: {e}");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    pub(crate) async fn attempt(&self, capability: Capability, text: &str) -> Attempt {
        match capability {
            Capability::Neural => {
                if self.initialize().await != Readiness::Ready {
                    return Attempt::Permanent(SpeechError::Initialization(
                        "neural synthesizer unavailable".into(),
                    ));
                }
                match self.speak_neural(text).await {
                    Ok(()) => Attempt::Spoken,
                    Err(e) => Attempt::Retryable(e),
                }
            }
            Capability::Baseline => {
                let Some(baseline) = &self.baseline else {
                    return Attempt::Permanent(SpeechError::Unsupported(
                        "no platform speech configured".into(),
                    ));
                };
                match baseline.speak_live(text, self.params).await {
                    Ok(()) => Attempt::Spoken,
                    Err(e @ SpeechError::Unsupported(_)) => Attempt::Permanent(e),
                    Err(e) => Attempt::Retryable(e),
                }
            }
        }
    }

    async fn speak_neural(&self, text: &str) -> Result<()> {
        let bytes = self.synthesize(text).await?;
        let handle = self.output.prepare(bytes).await?;
        let played = self.output.play(&handle).await;
        self.output.release(handle);
        played
    }
}

async fn bring_up(neural: &dyn NeuralSynthesizer) -> Result<()> {
    let init_err = |e: SpeechError| SpeechError::Initialization(e.to_string());

    if !neural.model_present().await {
        info!("Neural voice model not found locally, downloading");
        neural.download_model().await.map_err(init_err)?;
    }
    neural.load().await.map_err(init_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::AudioHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Neural {
        present: bool,
        fail_load: bool,
        fail_synth: AtomicBool,
        downloads: AtomicUsize,
        loads: AtomicUsize,
        synths: AtomicUsize,
    }

    #[async_trait]
    impl NeuralSynthesizer for Neural {
        async fn model_present(&self) -> bool {
            self.present
        }

        async fn download_model(&self) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        }

        async fn load(&self) -> Result<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(SpeechError::Io("model file truncated".into()));
            }
            Ok(())
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            self.synths.fetch_add(1, Ordering::SeqCst);
            if self.fail_synth.load(Ordering::SeqCst) {
                return Err(SpeechError::Synthesis("backend hiccup".into()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct Baseline {
        spoken: parking_lot::Mutex<Vec<(String, VoiceParams)>>,
    }

    #[async_trait]
    impl BaselineSpeaker for Baseline {
        async fn speak_live(&self, text: &str, params: VoiceParams) -> Result<()> {
            self.spoken.lock().push((text.to_string(), params));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Output {
        played: AtomicUsize,
    }

    #[async_trait]
    impl AudioOutput for Output {
        async fn prepare(&self, bytes: Vec<u8>) -> Result<AudioHandle> {
            Ok(AudioHandle::new(bytes))
        }

        async fn play(&self, _handle: &AudioHandle) -> Result<()> {
            self.played.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self, _handle: AudioHandle) {}
    }

    fn gateway(neural: Option<Arc<Neural>>, baseline: Option<Arc<Baseline>>) -> SpeechGateway {
        let params = VoiceParams {
            rate: 0.9,
            ..VoiceParams::default()
        };
        let mut gw = SpeechGateway::new(Arc::new(Output::default()), params);
        if let Some(n) = neural {
            gw = gw.with_neural(n);
        }
        if let Some(b) = baseline {
            gw = gw.with_baseline(b);
        }
        gw
    }

    #[tokio::test]
    async fn test_concurrent_initialization_shares_one_download() {
        let neural = Arc::new(Neural::default());
        let gw = gateway(Some(neural.clone()), None);

        let (a, b, c) = tokio::join!(gw.initialize(), gw.initialize(), gw.initialize());
        assert_eq!((a, b, c), (Readiness::Ready, Readiness::Ready, Readiness::Ready));
        assert_eq!(neural.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(neural.loads.load(Ordering::SeqCst), 1);
        assert!(gw.is_neural_ready());
    }

    #[tokio::test]
    async fn test_present_model_skips_download() {
        let neural = Arc::new(Neural {
            present: true,
            ..Neural::default()
        });
        let gw = gateway(Some(neural.clone()), None);
        assert_eq!(gw.initialize().await, Readiness::Ready);
        assert_eq!(neural.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_init_is_sticky_and_falls_back() {
        let neural = Arc::new(Neural {
            fail_load: true,
            ..Neural::default()
        });
        let baseline = Arc::new(Baseline::default());
        let gw = gateway(Some(neural.clone()), Some(baseline.clone()));

        assert_eq!(gw.speak("first").await, Ok(Capability::Baseline));
        assert_eq!(gw.speak("second").await, Ok(Capability::Baseline));
        assert_eq!(neural.loads.load(Ordering::SeqCst), 1);
        assert_eq!(neural.synths.load(Ordering::SeqCst), 0);

        let spoken = baseline.spoken.lock();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[0].1.rate, 0.9);
    }

    #[tokio::test]
    async fn test_synthesize_in_baseline_mode_is_unsupported() {
        let gw = gateway(None, Some(Arc::new(Baseline::default())));
        assert!(matches!(
            gw.synthesize("hello").await,
            Err(SpeechError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_neural_failure_is_retryable_per_call() {
        let neural = Arc::new(Neural::default());
        neural.fail_synth.store(true, Ordering::SeqCst);
        let baseline = Arc::new(Baseline::default());
        let gw = gateway(Some(neural.clone()), Some(baseline.clone()));

        assert!(matches!(
            gw.attempt(Capability::Neural, "hi").await,
            Attempt::Retryable(SpeechError::Synthesis(_))
        ));
        assert_eq!(gw.speak("hi").await, Ok(Capability::Baseline));

        neural.fail_synth.store(false, Ordering::SeqCst);
        assert_eq!(gw.speak("hi").await, Ok(Capability::Neural));
    }

    #[tokio::test]
    async fn test_speak_baseline_skips_neural() {
        let neural = Arc::new(Neural::default());
        let baseline = Arc::new(Baseline::default());
        let gw = gateway(Some(neural.clone()), Some(baseline.clone()));

        assert_eq!(gw.speak_baseline("hi").await, Ok(Capability::Baseline));
        assert_eq!(neural.synths.load(Ordering::SeqCst), 0);
        assert!(matches!(
            gateway(Some(neural), None).speak_baseline("hi").await,
            Err(SpeechError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let gw = gateway(None, None);
        assert_eq!(
            gw.attempt(Capability::Baseline, "hi").await,
            Attempt::Permanent(SpeechError::Unsupported("no platform speech configured".into()))
        );
        assert!(matches!(gw.speak("hi").await, Err(SpeechError::Unsupported(_))));
    }
}
