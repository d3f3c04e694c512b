//! Kokoro neural synthesizer: text → phonemes → ONNX inference → WAV bytes.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Samples → 16-bit mono WAV (hound)
//!
//! Model files are downloaded into `model_dir` on first use.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::NeuralSynthesizer;
use crate::config::TTSConfig;
use crate::error::{Result, SpeechError};

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

const MODEL_FILE: &str = "kokoro-v1.0.onnx";
const VOICES_FILE: &str = "voices-v1.0.bin";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Loaded model state, shared with blocking inference tasks.
struct KokoroModel {
    // ort 2.0 Session::run needs &mut
    session: Mutex<ort::session::Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    // Style vectors indexed by token count. shape: (510, 256)
    styles: Array2<f32>,
    speed: f32,
}

pub struct KokoroSynthesizer {
    model_dir: PathBuf,
    downloads: Vec<(String, &'static str)>,
    voice: String,
    speed: f32,
    client: reqwest::Client,
    model: OnceLock<Arc<KokoroModel>>,
}

impl KokoroSynthesizer {
    pub fn new(config: &TTSConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            downloads: vec![
                (config.model_url.clone(), MODEL_FILE),
                (config.voices_url.clone(), VOICES_FILE),
                (config.tokenizer_url.clone(), TOKENIZER_FILE),
            ],
            voice: config.voice.clone(),
            speed: config.speed,
            client: reqwest::Client::new(),
            model: OnceLock::new(),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.model_dir.join(file)
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let fetch_err = |e: reqwest::Error| SpeechError::Initialization(format!("{url}: {e}"));

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?;
        let total = response.content_length();

        // Write to a sibling file so a partial download never looks present
        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut loaded: u64 = 0;
        let mut last_pct = 0;

        while let Some(chunk) = response.chunk().await.map_err(fetch_err)? {
            file.write_all(&chunk).await?;
            loaded += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                let pct = loaded * 100 / total;
                if pct >= last_pct + 10 {
                    last_pct = pct;
                    info!("Downloading {}: {pct}%", dest.display());
                }
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        info!("Downloaded {} ({loaded} bytes)", dest.display());
        Ok(())
    }
}

#[async_trait]
impl NeuralSynthesizer for KokoroSynthesizer {
    async fn model_present(&self) -> bool {
        self.downloads
            .iter()
            .all(|(_, file)| self.path(file).is_file())
    }

    async fn download_model(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.model_dir).await?;
        for (url, file) in &self.downloads {
            let dest = self.path(file);
            if dest.is_file() {
                continue;
            }
            self.fetch(url, &dest).await?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        if self.model.get().is_some() {
            return Ok(());
        }

        let model_path = self.path(MODEL_FILE);
        let voices_path = self.path(VOICES_FILE);
        let tokenizer_path = self.path(TOKENIZER_FILE);
        let voice = self.voice.clone();
        let speed = self.speed;

        let model = tokio::task::spawn_blocking(move || {
            KokoroModel::load(&model_path, &voices_path, &tokenizer_path, &voice, speed)
        })
        .await
        .map_err(|e| SpeechError::Initialization(format!("model load task failed: {e}")))??;

        // A concurrent load may have won; either model is equivalent
        let _ = self.model.set(Arc::new(model));
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let model = self
            .model
            .get()
            .cloned()
            .ok_or_else(|| SpeechError::Synthesis("model not loaded".into()))?;
        let text = text.to_string();

        tokio::task::spawn_blocking(move || model.render_wav(&text))
            .await
            .map_err(|e| SpeechError::Synthesis(format!("synthesis task failed: {e}")))?
    }
}

impl KokoroModel {
    /// Blocking; call from spawn_blocking.
    fn load(
        model_path: &Path,
        voices_path: &Path,
        tokenizer_path: &Path,
        voice: &str,
        speed: f32,
    ) -> Result<Self> {
        let t0 = Instant::now();
        let init = SpeechError::Initialization;

        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_tokenizer(tokenizer_path).map_err(init)?;

        info!("Loading voice '{voice}' from {}", voices_path.display());
        let styles = load_voice(voices_path, voice).map_err(init)?;

        info!("Loading ONNX model from {}", model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| init(format!("Failed to create ONNX session builder: {e}")))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| init(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| init(format!("Failed to set thread count: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| init(format!("Failed to load ONNX model: {e}")))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        info!("Kokoro model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            styles,
            speed,
        })
    }

    fn render_wav(&self, text: &str) -> Result<Vec<u8>> {
        let t0 = Instant::now();
        let mut samples = Vec::new();
        for sentence in split_sentences(text.trim()) {
            samples.extend(self.generate_audio(sentence).map_err(SpeechError::Synthesis)?);
        }

        if samples.is_empty() {
            return Err(SpeechError::Synthesis(format!("no audio produced for {text:?}")));
        }

        debug!(
            "Synthesized {:.1}s of audio in {}ms",
            samples.len() as f32 / SAMPLE_RATE as f32,
            t0.elapsed().as_millis()
        );
        encode_wav(&samples)
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str) -> std::result::Result<Vec<f32>, String> {
        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| format!("Phonemization failed: {e}"))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → token IDs, unknown characters dropped
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0);

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        // 3. Style vector for this token count (clamped to max)
        let style_idx = (n_tokens.saturating_sub(2)).min(self.styles.nrows() - 1);
        let style_vec: Vec<f32> = self.styles.row(style_idx).to_vec();

        // 4. ONNX input tensors
        let tokens_array = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| format!("Failed to create tokens tensor: {e}"))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| format!("Failed to create tokens ort tensor: {e}"))?;

        let style_array = Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| format!("Failed to create style tensor: {e}"))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| format!("Failed to create style ort tensor: {e}"))?;

        let speed_array = ndarray::Array1::from_vec(vec![self.speed]);
        let speed_tensor = Tensor::from_array(speed_array)
            .map_err(|e| format!("Failed to create speed ort tensor: {e}"))?;

        // 5. Inference
        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| format!("ONNX inference failed: {e}"))?;

        let first_output = outputs
            .iter()
            .next()
            .ok_or("No output tensor from model")?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract audio tensor: {e}"))?;

        Ok(audio_slice.to_vec())
    }
}

/// f32 [-1, 1] samples → 16-bit mono WAV.
fn encode_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| SpeechError::Synthesis(format!("WAV encoding failed: {e}"));

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec).map_err(wav_err)?;
        for &sample in samples {
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(buffer.into_inner())
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> std::result::Result<HashMap<char, i64>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read tokenizer: {e}"))?;

    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse tokenizer JSON: {e}"))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or("Missing model.vocab in tokenizer.json")?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id.as_i64().ok_or("Token ID is not an integer")?;
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load one voice's style table from the NPZ voices file.
fn load_voice(path: &Path, voice: &str) -> std::result::Result<Array2<f32>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to open voices file: {e}"))?;

    let mut npz =
        NpzReader::new(file).map_err(|e| format!("Failed to read NPZ voices file: {e}"))?;

    let arr: Array3<f32> = npz
        .by_name(&format!("{voice}.npy"))
        .map_err(|e| format!("Failed to read voice '{voice}': {e}"))?;

    // Shape is (510, 1, 256). Squeeze the middle dimension.
    let dim0 = arr.shape()[0];
    let dim2 = arr.shape()[2];
    if dim0 == 0 {
        return Err(format!("Voice '{voice}' has no style vectors"));
    }
    arr.into_shape_with_order((dim0, dim2))
        .map_err(|e| format!("Failed to reshape voice '{voice}': {e}"))
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_announcement() {
        let parts = split_sentences("Time for 09:00. You need to: Take medication");
        assert_eq!(parts, ["Time for 09:00.", "You need to: Take medication"]);
    }

    #[test]
    fn test_split_keeps_clock_colons_and_decimals() {
        assert_eq!(split_sentences("Take 2.5 pills"), ["Take 2.5 pills"]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_empty_voice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voices.npz");
        let mut npz = ndarray_npy::NpzWriter::new(fs::File::create(&path).unwrap());
        npz.add_array("af_empty", &Array3::<f32>::zeros((0, 1, 256)))
            .unwrap();
        npz.add_array("af_heart", &Array3::<f32>::zeros((4, 1, 256)))
            .unwrap();
        npz.finish().unwrap();

        let err = load_voice(&path, "af_empty").unwrap_err();
        assert!(err.contains("no style vectors"), "{err}");
        assert_eq!(load_voice(&path, "af_heart").unwrap().nrows(), 4);
    }

    #[test]
    fn test_encode_wav_header() {
        let wav = encode_wav(&[0.0, 0.5, -0.5, 1.0]).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 4);
    }

    #[tokio::test]
    async fn test_model_absent_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = TTSConfig {
            model_dir: dir.path().to_path_buf(),
            ..TTSConfig::default()
        };
        let synth = KokoroSynthesizer::new(&config);
        assert!(!synth.model_present().await);
        assert!(matches!(
            synth.synthesize("hello").await,
            Err(SpeechError::Synthesis(_))
        ));
    }
}
