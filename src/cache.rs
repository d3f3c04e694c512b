//! Content-keyed cache of synthesized announcement audio.
//!
//! Entries are keyed by the SHA-256 of the announcement text, so blocks that
//! would say the same thing share one entry. At most one synthesis per key is
//! in flight: concurrent `preload`/`play` calls await the same shared future.
//! Skipping the cache entirely never changes what gets announced.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::announcement::{build_announcement_text, AnnouncementKey};
use crate::error::{Result, SpeechError};
use crate::schedule::TimeBlock;
use crate::speech::{AudioHandle, Capability, SpeechGateway};

type PendingSynthesis = Shared<BoxFuture<'static, Result<()>>>;

/// What `play` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announced {
    /// Nothing outstanding, so nothing said.
    Nothing,
    FromCache,
    Live(Capability),
    /// Every speech capability failed.
    Silent,
}

struct CacheEntry {
    handle: AudioHandle,
    source_text: String,
}

struct InFlight {
    ticket: u64,
    source_text: String,
    synthesis: PendingSynthesis,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<AnnouncementKey, CacheEntry>,
    in_flight: HashMap<AnnouncementKey, InFlight>,
    next_ticket: u64,
}

pub struct AnnouncementCache {
    gateway: Arc<SpeechGateway>,
    state: Arc<Mutex<CacheState>>,
}

impl AnnouncementCache {
    pub fn new(gateway: Arc<SpeechGateway>) -> Self {
        Self {
            gateway,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.state
            .lock()
            .entries
            .contains_key(&AnnouncementKey::for_text(text))
    }

    /// Synthesize and cache the block's announcement ahead of time.
    ///
    /// Failures are logged and not cached; the next call retries.
    pub async fn preload(&self, block: &TimeBlock) {
        let text = build_announcement_text(block);
        if text.is_empty() {
            return;
        }

        match self.ensure_cached(text).await {
            Ok(()) => {}
            Err(e @ SpeechError::Unsupported(_)) => {
                debug!("Not preloading announcement for {}: {e}", block.time)
            }
            Err(e) => warn!("Failed to preload announcement for {}: {e}", block.time),
        }
    }

    /// Announce the block's outstanding items, from cache when possible.
    ///
    /// A miss synthesizes through the same per-key slot as `preload`, so a
    /// concurrent preload of the same text waits instead of synthesizing again.
    pub async fn play(&self, block: &TimeBlock) -> Announced {
        let text = build_announcement_text(block);
        if text.is_empty() {
            return Announced::Nothing;
        }
        let key = AnnouncementKey::for_text(&text);

        let (handle, fresh) = match self.cached_or_pending(&key).await {
            Some(handle) => (Some(handle), false),
            None => match self.ensure_cached(text.clone()).await {
                Ok(()) => (self.cached_handle(&key), true),
                Err(e @ SpeechError::Unsupported(_)) => {
                    debug!("No cacheable audio for {key}: {e}");
                    (None, false)
                }
                Err(e) => {
                    warn!("Synthesis for {key} failed, using platform speech: {e}");
                    return self.speak_live(self.gateway.speak_baseline(&text).await);
                }
            },
        };

        if let Some(handle) = handle {
            match self.gateway.output().play(&handle).await {
                Ok(()) if fresh => {
                    debug!("Synthesized and played announcement {key}");
                    return Announced::Live(Capability::Neural);
                }
                Ok(()) => {
                    debug!("Played cached announcement {key}");
                    return Announced::FromCache;
                }
                Err(e) => warn!("Cached announcement {key} failed to play, speaking live: {e}"),
            }
        }

        self.speak_live(self.gateway.speak(&text).await)
    }

    fn speak_live(&self, spoken: Result<Capability>) -> Announced {
        match spoken {
            Ok(capability) => Announced::Live(capability),
            Err(e) => {
                warn!("Announcement skipped, no speech available: {e}");
                Announced::Silent
            }
        }
    }

    /// Release the entry for the block's current text, or everything.
    pub fn clear(&self, block: Option<&TimeBlock>) {
        match block {
            Some(block) => {
                let text = build_announcement_text(block);
                if !text.is_empty() {
                    self.clear_text(&text);
                }
            }
            None => self.clear_all(),
        }
    }

    /// Drop the entry for `text`. A synthesis still running for it is
    /// abandoned and its result discarded when it lands.
    pub fn clear_text(&self, text: &str) {
        let key = AnnouncementKey::for_text(text);
        let entry = {
            let mut state = self.state.lock();
            state.in_flight.remove(&key);
            state.entries.remove(&key)
        };
        if let Some(entry) = entry {
            debug!("Clearing cached announcement {key}");
            self.gateway.output().release(entry.handle);
        }
    }

    pub fn clear_all(&self) {
        let drained: Vec<CacheEntry> = {
            let mut state = self.state.lock();
            state.in_flight.clear();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        if !drained.is_empty() {
            info!("Clearing {} cached announcements", drained.len());
        }
        for entry in drained {
            self.gateway.output().release(entry.handle);
        }
    }

    /// Release entries whose text is not in `texts`, and abandon any
    /// synthesis still running for such text.
    pub fn retain_texts(&self, texts: &HashSet<String>) {
        let stale: Vec<CacheEntry> = {
            let mut state = self.state.lock();
            state
                .in_flight
                .retain(|_, in_flight| texts.contains(&in_flight.source_text));
            let keys: Vec<AnnouncementKey> = state
                .entries
                .iter()
                .filter(|(_, entry)| !texts.contains(&entry.source_text))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| state.entries.remove(key))
                .collect()
        };
        for entry in stale {
            debug!("Dropping stale announcement {:?}", entry.source_text);
            self.gateway.output().release(entry.handle);
        }
    }

    fn cached_handle(&self, key: &AnnouncementKey) -> Option<AudioHandle> {
        self.state.lock().entries.get(key).map(|e| e.handle.clone())
    }

    /// Cached audio, waiting for an in-flight synthesis of the same key.
    async fn cached_or_pending(&self, key: &AnnouncementKey) -> Option<AudioHandle> {
        let pending = {
            let state = self.state.lock();
            if let Some(entry) = state.entries.get(key) {
                return Some(entry.handle.clone());
            }
            state.in_flight.get(key).map(|f| f.synthesis.clone())
        };

        match pending {
            Some(synthesis) if synthesis.clone().await.is_ok() => self.cached_handle(key),
            _ => None,
        }
    }

    async fn ensure_cached(&self, text: String) -> Result<()> {
        let key = AnnouncementKey::for_text(&text);
        let synthesis = {
            let mut state = self.state.lock();
            if state.entries.contains_key(&key) {
                return Ok(());
            }
            match state.in_flight.get(&key) {
                Some(in_flight) => in_flight.synthesis.clone(),
                None => {
                    state.next_ticket += 1;
                    let ticket = state.next_ticket;
                    let synthesis = synthesize_entry(
                        self.gateway.clone(),
                        self.state.clone(),
                        key.clone(),
                        text.clone(),
                        ticket,
                    )
                    .boxed()
                    .shared();
                    state.in_flight.insert(
                        key,
                        InFlight {
                            ticket,
                            source_text: text,
                            synthesis: synthesis.clone(),
                        },
                    );
                    synthesis
                }
            }
        };

        synthesis.await
    }
}

impl Drop for AnnouncementCache {
    fn drop(&mut self) {
        self.clear_all();
    }
}

/// Runs once per ticket; every waiter on the key shares the result.
async fn synthesize_entry(
    gateway: Arc<SpeechGateway>,
    state: Arc<Mutex<CacheState>>,
    key: AnnouncementKey,
    text: String,
    ticket: u64,
) -> Result<()> {
    let prepared = match gateway.synthesize(&text).await {
        Ok(bytes) => gateway.output().prepare(bytes).await,
        Err(e) => Err(e),
    };

    let (prepared, current) = {
        let mut state = state.lock();
        let current = state
            .in_flight
            .get(&key)
            .is_some_and(|f| f.ticket == ticket);
        if current {
            state.in_flight.remove(&key);
            if let Ok(handle) = &prepared {
                state.entries.insert(
                    key.clone(),
                    CacheEntry {
                        handle: handle.clone(),
                        source_text: text,
                    },
                );
            }
        }
        (prepared, current)
    };

    match prepared {
        Ok(_) if current => {
            debug!("Cached announcement {key}");
            Ok(())
        }
        Ok(handle) => {
            debug!("Discarding audio for cleared announcement {key}");
            gateway.output().release(handle);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
