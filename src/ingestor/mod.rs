//! Provider downloads.
//!
//! Each configured provider is a playlist, guide, or tuner lineup at a
//! URL or local path. Downloads keep availability bookkeeping on the
//! provider record and cache the last good copy next to the other data
//! files, so a flaky upstream degrades to stale data instead of an
//! empty lineup.

pub mod m3u_parser;
pub mod tuner;
pub mod xmltv_parser;

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::DataPaths;
use crate::errors::SourceError;
use crate::models::{ProviderKind, ProviderSource};
use crate::persist;

/// File extension of a provider's on-disk cache copy.
pub fn cache_extension(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Playlist => "m3u",
        ProviderKind::Guide => "xml",
        ProviderKind::Tuner => "json",
    }
}

pub struct ProviderClient {
    client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Download a provider's file, updating its bookkeeping. On
    /// failure the last good cached copy is served when one exists;
    /// only a failure with no cache surfaces an error.
    pub async fn refresh_provider(
        &self,
        source: &mut ProviderSource,
        paths: &DataPaths,
    ) -> Result<String, SourceError> {
        source.download_count += 1;
        let cache = paths.provider_file(&source.id, cache_extension(source.kind));

        match self.download(&source.source_location).await {
            Ok(body) => {
                if let Err(e) = persist::write_bytes_atomic(&cache, body.as_bytes()) {
                    warn!("provider '{}': failed to cache download: {e}", source.name);
                }
                source.last_update = Some(Utc::now());
                info!(
                    "provider '{}': downloaded {} bytes (availability {:.1}%)",
                    source.name,
                    body.len(),
                    source.availability()
                );
                Ok(body)
            }
            Err(e) => {
                source.error_count += 1;
                if cache.exists() {
                    warn!(
                        "provider '{}': download failed ({e}); serving cached copy",
                        source.name
                    );
                    std::fs::read_to_string(&cache).map_err(|io| SourceError::Connection {
                        url: source.source_location.clone(),
                        message: io.to_string(),
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Fetch a URL or read a local file, without bookkeeping.
    pub async fn download(&self, location: &str) -> Result<String, SourceError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self
                .client
                .get(location)
                .send()
                .await
                .map_err(|e| SourceError::Connection {
                    url: location.to_string(),
                    message: e.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    url: location.to_string(),
                });
            }
            let bytes = response.bytes().await.map_err(|e| SourceError::Connection {
                url: location.to_string(),
                message: e.to_string(),
            })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else if std::path::Path::new(location).exists() {
            std::fs::read_to_string(location).map_err(|e| SourceError::Connection {
                url: location.to_string(),
                message: e.to_string(),
            })
        } else {
            Err(SourceError::InvalidLocation {
                location: location.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_extension_matches_kind() {
        assert_eq!(cache_extension(ProviderKind::Playlist), "m3u");
        assert_eq!(cache_extension(ProviderKind::Guide), "xml");
        assert_eq!(cache_extension(ProviderKind::Tuner), "json");
    }

    #[tokio::test]
    async fn download_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("list.m3u");
        std::fs::write(&file, "#EXTM3U\n").unwrap();

        let client = ProviderClient::new("test");
        let body = client.download(file.to_str().unwrap()).await.unwrap();
        assert_eq!(body, "#EXTM3U\n");
    }

    #[tokio::test]
    async fn download_rejects_missing_locations() {
        let client = ProviderClient::new("test");
        let err = client.download("/no/such/file.m3u").await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidLocation { .. }));
    }

    #[tokio::test]
    async fn refresh_falls_back_to_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let mut source = ProviderSource {
            id: "p1".into(),
            kind: ProviderKind::Playlist,
            name: "flaky".into(),
            source_location: "/gone/away.m3u".into(),
            uuid_key: String::new(),
            last_update: None,
            download_count: 0,
            error_count: 0,
        };
        std::fs::write(paths.provider_file("p1", "m3u"), "#EXTM3U\ncached\n").unwrap();

        let client = ProviderClient::new("test");
        let body = client.refresh_provider(&mut source, &paths).await.unwrap();
        assert!(body.contains("cached"));
        assert_eq!(source.download_count, 1);
        assert_eq!(source.error_count, 1);
    }
}
