//! HDHomeRun tuner lineup ingestion.
//!
//! A tuner provider serves a `lineup.json` array instead of an M3U.
//! Entries are mapped onto the same [`IngestedStream`] records the
//! playlist parser produces, so the merge engine sees one shape.

use serde::Deserialize;
use tracing::warn;

use crate::models::{IngestedStream, ProviderSource};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LineupEntry {
    guide_number: Option<String>,
    guide_name: String,
    #[serde(rename = "URL")]
    url: String,
}

/// Parse a tuner lineup into stream records. Unreadable JSON yields an
/// empty list, mirroring the playlist parser's missing-header behavior.
pub fn parse_lineup(content: &str, provider: &ProviderSource) -> Vec<IngestedStream> {
    let entries: Vec<LineupEntry> = match serde_json::from_str(content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("tuner lineup for provider '{}' unreadable: {e}", provider.name);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter(|entry| !entry.guide_name.is_empty() && !entry.url.is_empty())
        .map(|entry| {
            let mut stream = IngestedStream {
                name: entry.guide_name,
                url: entry.url,
                provider_id: provider.id.clone(),
                ..Default::default()
            };
            // The advertised guide number doubles as a stable id.
            if let Some(number) = entry.guide_number {
                if !number.is_empty() {
                    stream.uuid_key = "GuideNumber".to_string();
                    stream.uuid_value = number;
                }
            }
            stream.build_search_corpus();
            stream
        })
        .collect()
}
