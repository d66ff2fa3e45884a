//! Periodic refresh scheduler.
//!
//! A single timer wakes every 60 seconds and compares the wall clock
//! against the configured `HHmm` update times. A matching minute runs
//! the full refresh chain: backup snapshot, provider re-download,
//! merge, and output emission. The scan flag suppresses concurrent
//! triggers; a firing is latched per `(date, HHmm)` so one minute
//! never fires twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::errors::AppError;
use crate::filters::FilterEngine;
use crate::ingestor::{m3u_parser, tuner, xmltv_parser, ProviderClient};
use crate::models::{Guide, IngestedStream, ProviderKind};
use crate::output;
use crate::persist;
use crate::xepg::MergeReport;

/// Run the scheduler loop until the process exits.
pub async fn run_scheduler(context: Arc<AppContext>) {
    info!("scheduler started (60s tick)");
    let mut ticker = interval(Duration::from_secs(60));
    let mut last_fired: Option<String> = None;

    loop {
        ticker.tick().await;
        let now = chrono::Local::now().naive_local();
        let update_times = context.settings.read().await.update_times.clone();

        let Some(stamp) = should_fire(now, &update_times, last_fired.as_deref()) else {
            continue;
        };
        last_fired = Some(stamp);

        if context.scan_in_progress() {
            warn!("scheduled refresh suppressed: scan already in progress");
            continue;
        }

        let settings = context.settings.read().await.clone();
        if let Err(e) = persist::backup_state(
            context.paths.root(),
            &context.paths.backup_dir(),
            settings.backup_keep,
        ) {
            warn!("backup before refresh failed: {e}");
        }

        match run_refresh(&context).await {
            Ok(report) => info!(
                "scheduled refresh done: {} matched, {} created, {} deleted",
                report.matched, report.created, report.deleted
            ),
            Err(e) => {
                error!("scheduled refresh failed: {e}");
                context.log.error(format!("scheduled refresh failed: {e}"));
            }
        }
    }
}

/// Decide whether a tick at `now` fires a refresh. Returns the latch
/// stamp to remember, so a minute that already fired (or several ticks
/// landing inside it) cannot fire again.
pub fn should_fire(
    now: NaiveDateTime,
    update_times: &[String],
    last_fired: Option<&str>,
) -> Option<String> {
    let hhmm = now.format("%H%M").to_string();
    if !update_times.iter().any(|t| t == &hhmm) {
        return None;
    }
    let stamp = now.format("%Y%m%d-%H%M").to_string();
    if last_fired == Some(stamp.as_str()) {
        return None;
    }
    Some(stamp)
}

/// The full refresh chain: download every provider, parse and filter
/// the streams, merge into the channel table, and emit the merged
/// outputs. Returns busy when another scan holds the flag.
pub async fn run_refresh(context: &Arc<AppContext>) -> Result<MergeReport, AppError> {
    let _guard = context.begin_scan()?;

    let mut settings = context.settings.read().await.clone();
    let client = ProviderClient::new(&settings.user_agent);
    let engine = FilterEngine::compile(&settings.filters);

    // Download and parse stream providers.
    let mut accepted: Vec<IngestedStream> = Vec::new();
    let mut guides: BTreeMap<String, Guide> = BTreeMap::new();
    for provider in settings.providers.iter_mut() {
        match provider.kind {
            ProviderKind::Playlist | ProviderKind::Tuner => {
                let body = match client.refresh_provider(provider, &context.paths).await {
                    Ok(body) => body,
                    Err(e) => {
                        context
                            .log
                            .warning(format!("provider '{}': {e}", provider.name));
                        continue;
                    }
                };
                let streams = match provider.kind {
                    ProviderKind::Tuner => tuner::parse_lineup(&body, provider),
                    _ => m3u_parser::parse_playlist(&body, provider),
                };
                let total = streams.len();
                accepted.extend(streams.into_iter().filter_map(|mut stream| {
                    engine.accept(&mut stream).then_some(stream)
                }));
                info!(
                    "provider '{}': {total} streams parsed, {} accepted so far",
                    provider.name,
                    accepted.len()
                );
            }
            ProviderKind::Guide => {
                let body = match client.refresh_provider(provider, &context.paths).await {
                    Ok(body) => body,
                    Err(e) => {
                        context
                            .log
                            .warning(format!("guide '{}': {e}", provider.name));
                        continue;
                    }
                };
                match xmltv_parser::parse_guide(&body) {
                    Ok(guide) => {
                        guides.insert(provider.id.clone(), guide);
                    }
                    Err(e) => {
                        context
                            .log
                            .warning(format!("guide '{}' unparseable: {e}", provider.name));
                    }
                }
            }
        }
    }

    let mut data_guard = context.data.write().await;
    let data = &mut *data_guard;

    // Merge on a working copy; the in-memory table only advances once
    // the new table is safely on disk.
    let mut table = data.xepg.clone();
    let report = table.merge(accepted, &settings, &guides);
    table.save(&context.paths.xepg_file())?;
    data.xepg = table;

    output::emit_outputs(
        &data.xepg,
        &guides,
        &mut data.urls,
        &context.paths,
        &context.system.base_url(),
        Utc::now(),
    )?;

    if !context.guide_cache_disabled() {
        data.guides = guides;
    }
    drop(data_guard);

    // Persist provider bookkeeping updated during the downloads.
    settings.save(&context.paths)?;
    *context.settings.write().await = settings;

    Ok(report)
}
