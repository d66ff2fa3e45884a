//! Shared-stream segment buffer.
//!
//! Every distinct `(playlistId, urlHash)` gets at most one producer,
//! which owns the single upstream HTTP connection and slices the body
//! into numbered segment files; any number of readers drain those
//! segments concurrently at their own pace. The producer exists iff at
//! least one reader is attached.

pub mod producer;
pub mod reader;
pub mod ts;
pub mod vfs;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::errors::BufferError;
use vfs::SegmentStore;

pub use reader::SegmentReader;

/// How long a session lingers after its last reader detaches before
/// the segment folder is deleted.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Buffer policy snapshot taken from settings when a stream opens.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Segment size; equals the working-buffer size.
    pub segment_size: usize,
    pub client_timeout: Duration,
    pub retry_enabled: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
    pub store_in_ram: bool,
    pub temp_path: PathBuf,
    pub allow_loopback: bool,
}

impl BufferConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            segment_size: (settings.buffer_size_kb as usize).max(1) * 1024,
            client_timeout: Duration::from_millis(settings.buffer_client_timeout_ms.max(1)),
            retry_enabled: settings.retry_enabled,
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            user_agent: settings.user_agent.clone(),
            store_in_ram: settings.store_buffer_in_ram,
            temp_path: settings.temp_path.clone(),
            allow_loopback: settings.allow_loopback,
        }
    }
}

/// Session lifecycle. `Recovering` is entered on a transport error and
/// left by a successful range-resume; `Failed` is terminal and
/// surfaces to every reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Connecting,
    Streaming,
    Recovering,
    Finished,
    Failed(String),
}

/// Rolling 1-second throughput window, for observability.
#[derive(Debug)]
pub struct BandwidthCalculation {
    window_start: Instant,
    bytes_in_window: u64,
    pub last_rate_bps: u64,
}

impl Default for BandwidthCalculation {
    fn default() -> Self {
        Self {
            window_start: Instant::now(),
            bytes_in_window: 0,
            last_rate_bps: 0,
        }
    }
}

impl BandwidthCalculation {
    pub fn record(&mut self, bytes: u64) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.last_rate_bps =
                (self.bytes_in_window as f64 / elapsed.as_secs_f64()) as u64;
            self.window_start = Instant::now();
            self.bytes_in_window = 0;
        }
        self.bytes_in_window += bytes;
    }
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub status: StreamStatus,
    pub ref_count: usize,
    /// Index the producer writes next; segments `1..next_segment` have
    /// been produced (some may already be consumed and deleted).
    pub next_segment: u64,
    /// Per-segment delivery counts; a segment is deleted once every
    /// attached reader has drained it.
    pub consumed: HashMap<u64, usize>,
    pub bandwidth: BandwidthCalculation,
}

impl SessionState {
    fn fresh() -> Self {
        Self {
            status: StreamStatus::Connecting,
            ref_count: 0,
            next_segment: 1,
            consumed: HashMap::new(),
            bandwidth: BandwidthCalculation::default(),
        }
    }
}

/// One upstream stream shared by all its readers.
pub struct StreamSession {
    pub key: String,
    pub playlist_id: String,
    pub url_hash: String,
    pub upstream_url: String,
    /// Segment folder `<tmp>/<playlistId>/<urlHash>/`.
    pub dir: PathBuf,
    pub config: BufferConfig,
    pub(crate) store: Arc<dyn SegmentStore>,
    pub(crate) state: Mutex<SessionState>,
    events_tx: watch::Sender<u64>,
    events_rx: watch::Receiver<u64>,
}

impl StreamSession {
    fn new(playlist_id: &str, upstream_url: &str, config: BufferConfig) -> Self {
        let url_hash = format!("{:x}", md5::compute(upstream_url));
        let key = session_key(playlist_id, &url_hash);
        let dir = config.temp_path.join(playlist_id).join(&url_hash);
        let store = vfs::make_store(config.store_in_ram);
        let (events_tx, events_rx) = watch::channel(0u64);
        Self {
            key,
            playlist_id: playlist_id.to_string(),
            url_hash,
            upstream_url: upstream_url.to_string(),
            dir,
            config,
            store,
            state: Mutex::new(SessionState::fresh()),
            events_tx,
            events_rx,
        }
    }

    pub(crate) fn segment_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index}.ts"))
    }

    /// Wake producers and readers waiting for a state change.
    pub(crate) fn bump(&self) {
        self.events_tx.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.events_rx.clone()
    }

    pub fn ref_count(&self) -> usize {
        self.state.lock().expect("session state poisoned").ref_count
    }

    pub(crate) fn ref_count_is_zero(&self) -> bool {
        self.ref_count() == 0
    }

    pub fn status(&self) -> StreamStatus {
        self.state
            .lock()
            .expect("session state poisoned")
            .status
            .clone()
    }
}

pub(crate) fn session_key(playlist_id: &str, url_hash: &str) -> String {
    format!("{playlist_id}{url_hash}")
}

/// Registry of live stream sessions, keyed by `playlistId||urlHash`.
pub struct StreamManager {
    sessions: DashMap<String, Arc<StreamSession>>,
    client: reqwest::Client,
}

impl StreamManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            client: reqwest::Client::new(),
        })
    }

    /// Attach a reader to the stream for `upstream_url`, launching the
    /// producer when this is the first reader. A later reader joins at
    /// the current segment boundary without a second upstream GET.
    pub fn open_stream(
        self: &Arc<Self>,
        playlist_id: &str,
        upstream_url: &str,
        config: BufferConfig,
    ) -> Result<SegmentReader, BufferError> {
        if !config.allow_loopback && is_loopback(upstream_url) {
            return Err(BufferError::LoopbackForbidden {
                url: upstream_url.to_string(),
            });
        }

        let url_hash = format!("{:x}", md5::compute(upstream_url));
        let key = session_key(playlist_id, &url_hash);
        let session = self
            .sessions
            .entry(key)
            .or_insert_with(|| Arc::new(StreamSession::new(playlist_id, upstream_url, config)))
            .clone();

        let (start_index, launch) = {
            let mut state = session.state.lock().expect("session state poisoned");
            state.ref_count += 1;
            if state.ref_count == 1 {
                *state = SessionState {
                    ref_count: 1,
                    ..SessionState::fresh()
                };
                (1, true)
            } else {
                (state.next_segment, false)
            }
        };

        if launch {
            debug!(
                "launching producer for {} ({})",
                session.upstream_url, session.key
            );
            let task_session = session.clone();
            let client = self.client.clone();
            tokio::spawn(async move {
                // Cold start: purge whatever a previous run left behind.
                if let Err(e) = task_session.store.clear_dir(&task_session.dir).await {
                    warn!("failed to purge segment dir: {e}");
                }
                producer::run(task_session, client).await;
            });
        }

        Ok(SegmentReader::new(self.clone(), session, start_index))
    }

    /// Detach a reader. When the last one goes, the producer is asked
    /// to stop and the folder is deleted after a grace period.
    pub(crate) fn release(self: &Arc<Self>, session: &Arc<StreamSession>) {
        let now_zero = {
            let mut state = session.state.lock().expect("session state poisoned");
            state.ref_count = state.ref_count.saturating_sub(1);
            state.ref_count == 0
        };
        session.bump();
        if !now_zero {
            return;
        }

        let manager = self.clone();
        let session = session.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(TEARDOWN_GRACE).await;
                let removed = manager
                    .sessions
                    .remove_if(&session.key, |_, s| s.ref_count_is_zero())
                    .is_some();
                if removed {
                    debug!("tearing down stream session {}", session.key);
                    if let Err(e) = session.store.clear_dir(&session.dir).await {
                        warn!("failed to remove segment dir: {e}");
                    }
                }
            });
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

fn is_loopback(upstream_url: &str) -> bool {
    url::Url::parse(upstream_url)
        .ok()
        .and_then(|u| u.host().map(|h| match h {
            url::Host::Domain(d) => d == "localhost",
            url::Host::Ipv4(ip) => ip.is_loopback(),
            url::Host::Ipv6(ip) => ip.is_loopback(),
        }))
        .unwrap_or(false)
}
