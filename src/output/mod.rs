//! Merged-output emission.
//!
//! Renders the channel table into the files downstream clients fetch:
//! the merged playlist (`tvmux.m3u`) and the merged guide
//! (`tvmux.xml`, plus a gzipped copy), and keeps `urls.json` mapping
//! client-facing stream ids back to their upstream origins.

pub mod m3u;
pub mod xmltv;

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::config::DataPaths;
use crate::errors::{AppError, PersistError};
use crate::models::{Guide, StreamUrlEntry};
use crate::persist;
use crate::xepg::XepgDb;

/// Stable handle mapping a client-facing stream URL to its upstream.
pub fn url_id(provider_id: &str, upstream_url: &str) -> String {
    format!("{:x}", md5::compute(format!("{provider_id}|{upstream_url}")))
}

/// Write all merged outputs. The table is validated first; a broken
/// invariant refuses to emit anything.
pub fn emit_outputs(
    db: &XepgDb,
    guides: &BTreeMap<String, Guide>,
    urls: &mut BTreeMap<String, StreamUrlEntry>,
    paths: &DataPaths,
    base_url: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    db.validate()?;

    let guide_url = format!("{base_url}/xmltv/tvmux.xml");
    let playlist = m3u::build_merged_m3u(db, urls, base_url, &guide_url);
    persist::write_bytes_atomic(&paths.merged_m3u_file(), playlist.as_bytes())?;

    let guide = xmltv::build_merged_xmltv(db, guides, now)
        .map_err(|e| AppError::configuration(format!("XMLTV emit failed: {e}")))?;
    persist::write_bytes_atomic(&paths.merged_xmltv_file(), &guide)?;

    let gz_path = paths.merged_xmltv_gz_file();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&guide)
        .map_err(|e| PersistError::io(gz_path.display().to_string(), e))?;
    let compressed = encoder
        .finish()
        .map_err(|e| PersistError::io(gz_path.display().to_string(), e))?;
    persist::write_bytes_atomic(&gz_path, &compressed)?;

    persist::write_json_atomic(&paths.urls_file(), urls)?;

    info!(
        "emitted {} active channels to {}",
        db.channels.values().filter(|c| c.x_active).count(),
        paths.root().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::{IngestedStream, ProviderKind, ProviderSource};

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.default_missing_epg = "60_Minutes".to_string();
        settings.providers.push(ProviderSource {
            id: "p1".into(),
            kind: ProviderKind::Playlist,
            name: "one".into(),
            source_location: "http://upstream/a.m3u".into(),
            uuid_key: String::new(),
            last_update: None,
            download_count: 0,
            error_count: 0,
        });
        settings
    }

    #[test]
    fn emit_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        paths.ensure().unwrap();

        let mut db = XepgDb::default();
        let mut stream = IngestedStream {
            provider_id: "p1".into(),
            name: "CNN".into(),
            group_title: "News".into(),
            url: "http://upstream/cnn.ts".into(),
            ..Default::default()
        };
        stream.build_search_corpus();
        db.merge(vec![stream], &settings(), &BTreeMap::new());

        let mut urls = BTreeMap::new();
        emit_outputs(
            &db,
            &BTreeMap::new(),
            &mut urls,
            &paths,
            "http://localhost:34400",
            Utc::now(),
        )
        .unwrap();

        assert!(paths.merged_m3u_file().exists());
        assert!(paths.merged_xmltv_file().exists());
        assert!(paths.merged_xmltv_gz_file().exists());
        assert!(paths.urls_file().exists());
        assert_eq!(urls.len(), 1);

        let entry = urls.values().next().unwrap();
        assert_eq!(entry.url, "http://upstream/cnn.ts");
        assert_eq!(entry.playlist_id, "p1");
    }

    #[test]
    fn url_id_is_stable_and_distinct_per_origin() {
        let a = url_id("p1", "http://upstream/1.ts");
        let b = url_id("p1", "http://upstream/1.ts");
        let c = url_id("p2", "http://upstream/1.ts");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
