//! Shared application context.
//!
//! One owned value threaded through the web layer, scheduler, and
//! admin paths instead of process-wide globals. Mutation is confined
//! to the scheduler/admin paths, both gated by the scan flag; readers
//! take snapshots through the locks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{env_flag, DataPaths, Settings, SystemInfo};
use crate::errors::{AppError, PersistError};
use crate::ingestor::xmltv_parser;
use crate::logsink::LogSink;
use crate::models::{Credential, Guide, ProviderKind, StreamUrlEntry};
use crate::persist;
use crate::xepg::XepgDb;

/// Mutable runtime state behind the context's data lock.
#[derive(Default)]
pub struct Data {
    pub xepg: XepgDb,
    /// Parsed guides keyed by guide-provider id. Empty when the guide
    /// cache is disabled via TVMUX_DISABLE_CACHE.
    pub guides: BTreeMap<String, Guide>,
    /// urlId -> upstream resolution, mirrored in `urls.json`.
    pub urls: BTreeMap<String, StreamUrlEntry>,
    /// Stable lineup numbers, mirrored in `pms.json`.
    pub pms_numbers: BTreeMap<String, String>,
    pub credentials: Vec<Credential>,
}

pub struct AppContext {
    pub paths: DataPaths,
    pub system: SystemInfo,
    pub settings: RwLock<Settings>,
    pub data: RwLock<Data>,
    pub log: LogSink,
    scan_in_progress: AtomicBool,
    guide_cache_disabled: bool,
}

impl AppContext {
    /// Load every persisted state file from the data directory.
    pub fn initialize(paths: DataPaths, system: SystemInfo) -> Result<Arc<Self>, AppError> {
        paths
            .ensure()
            .map_err(|e| PersistError::io(paths.root().display().to_string(), e))?;
        let settings = Settings::load(&paths)?;

        let mut data = Data {
            xepg: XepgDb::load(&paths.xepg_file())?,
            ..Default::default()
        };
        if paths.urls_file().exists() {
            data.urls = persist::read_json(&paths.urls_file())?;
        }
        if paths.pms_file().exists() {
            data.pms_numbers = persist::read_json(&paths.pms_file())?;
        }
        if paths.auth_file().exists() {
            data.credentials = persist::read_json(&paths.auth_file())?;
        }

        let guide_cache_disabled = env_flag("TVMUX_DISABLE_CACHE");
        if !guide_cache_disabled {
            data.guides = load_cached_guides(&settings, &paths);
        }

        Ok(Arc::new(Self {
            paths,
            system,
            settings: RwLock::new(settings),
            data: RwLock::new(data),
            log: LogSink::default(),
            scan_in_progress: AtomicBool::new(false),
            guide_cache_disabled,
        }))
    }

    /// Acquire the merge/emit exclusion flag. Fails immediately with a
    /// busy status instead of blocking.
    pub fn begin_scan(self: &Arc<Self>) -> Result<ScanGuard, AppError> {
        if self
            .scan_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::ScanInProgress);
        }
        Ok(ScanGuard {
            context: self.clone(),
        })
    }

    pub fn scan_in_progress(&self) -> bool {
        self.scan_in_progress.load(Ordering::Acquire)
    }

    pub fn guide_cache_disabled(&self) -> bool {
        self.guide_cache_disabled
    }
}

/// Releases the scan flag on drop.
pub struct ScanGuard {
    context: Arc<AppContext>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.context.scan_in_progress.store(false, Ordering::Release);
    }
}

/// Parse the cached on-disk copy of every configured guide provider.
pub fn load_cached_guides(settings: &Settings, paths: &DataPaths) -> BTreeMap<String, Guide> {
    let mut guides = BTreeMap::new();
    for provider in settings
        .providers
        .iter()
        .filter(|p| p.kind == ProviderKind::Guide)
    {
        let cache = paths.provider_file(&provider.id, "xml");
        if !cache.exists() {
            continue;
        }
        match std::fs::read_to_string(&cache) {
            Ok(content) => match xmltv_parser::parse_guide(&content) {
                Ok(guide) => {
                    guides.insert(provider.id.clone(), guide);
                }
                Err(e) => warn!("cached guide for '{}' unreadable: {e}", provider.name),
            },
            Err(e) => warn!("cannot read cached guide for '{}': {e}", provider.name),
        }
    }
    guides
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Arc<AppContext> {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let system = SystemInfo {
            domain: "localhost:34400".to_string(),
            port: 34400,
        };
        // Keep the tempdir alive for the duration of the context.
        std::mem::forget(dir);
        AppContext::initialize(paths, system).unwrap()
    }

    #[test]
    fn scan_flag_is_exclusive_and_released_on_drop() {
        let context = context();
        let guard = context.begin_scan().unwrap();
        assert!(context.scan_in_progress());
        assert!(matches!(
            context.begin_scan(),
            Err(AppError::ScanInProgress)
        ));
        drop(guard);
        assert!(!context.scan_in_progress());
        let _second = context.begin_scan().unwrap();
    }

    #[test]
    fn initialize_creates_settings_and_empty_state() {
        let context = context();
        assert!(context.paths.settings_file().exists());
        let data = tokio_test::block_on(context.data.read());
        assert!(data.xepg.channels.is_empty());
        assert!(data.urls.is_empty());
    }
}
