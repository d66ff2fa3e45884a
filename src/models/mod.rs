use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A named upstream file: playlist, guide, or tuner lineup.
///
/// Created on admin action and persisted in settings. `download_count`
/// and `error_count` feed the informational availability percentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSource {
    pub id: String,
    pub kind: ProviderKind,
    pub name: String,
    /// URL or local filesystem path.
    pub source_location: String,
    /// Attribute name carrying the provider's stable per-stream id,
    /// checked in addition to the built-in `CUID` / `channel-id` keys.
    #[serde(default)]
    pub uuid_key: String,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Playlist,
    Guide,
    Tuner,
}

impl ProviderSource {
    /// Informational availability percentage; consumers must not rely
    /// on it for decisions.
    pub fn availability(&self) -> f64 {
        if self.download_count == 0 {
            return 100.0;
        }
        100.0 - 100.0 * self.error_count as f64 / self.download_count as f64
    }
}

/// Transient record produced by the playlist parser for each entry.
/// Discarded after the merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestedStream {
    pub name: String,
    pub group_title: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub tvg_shift: String,
    pub url: String,
    pub uuid_key: String,
    pub uuid_value: String,
    pub provider_id: String,
    /// Space-joined concatenation of the human-readable attributes,
    /// used by the filter's token match.
    pub search_corpus: String,
    /// Unknown attributes, preserved under their literal names.
    pub extra: HashMap<String, String>,
    /// Stamped by an accepting group-title filter.
    pub preserve_mapping: bool,
    /// Stamped by an accepting filter; overrides the allocation start.
    pub starting_channel: Option<f64>,
}

impl IngestedStream {
    /// Rebuild the search corpus from the current attribute values.
    pub fn build_search_corpus(&mut self) {
        self.search_corpus = format!(
            "{} {} {} {}",
            self.name, self.group_title, self.tvg_id, self.tvg_name
        );
    }
}

/// The persistent identity of a user-visible channel across refreshes.
///
/// Serialized into `xepg.json`, keyed by `x_id`. The compiled rename
/// regexes are rebuilt from their source strings on load and whenever
/// an admin edit changes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct XepgChannel {
    #[serde(rename = "x-id")]
    pub x_id: String,
    /// md5 over the identity tuple; primary match key on merge.
    pub hash: String,

    // Upstream-sourced fields, refreshed on every merge.
    pub provider_id: String,
    pub name: String,
    pub group_title: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub tvg_shift: String,
    pub url: String,
    pub uuid_key: String,
    pub uuid_value: String,

    // User-overridable mirrors.
    pub x_name: String,
    pub x_group_title: String,
    /// Display number as a rational string ("101" or "101.1").
    pub x_channel_number: String,
    pub x_timeshift: String,
    pub x_category: String,
    pub x_description: String,
    pub x_active: bool,

    // Guide binding. `"-"` means unbound; `"<dummy>"` selects the
    // synthesized schedule.
    pub guide_file: String,
    pub guide_channel_id: String,
    pub x_mapping: String,

    // Rename rules; empty string means disabled.
    pub rename_name_regex: String,
    pub rename_group_regex: String,
    #[serde(skip)]
    pub compiled_name_regex: Option<Regex>,
    #[serde(skip)]
    pub compiled_group_regex: Option<Regex>,

    // Update flags controlling which mirrors follow upstream.
    pub update_name: bool,
    pub update_group: bool,
    pub update_icon: bool,

    /// True when the upstream stream carried a non-empty uuid value at
    /// the most recent merge.
    #[serde(default)]
    pub has_uuid: bool,
}

impl XepgChannel {
    /// Recompile the rename regexes from their source strings. Invalid
    /// patterns clear the compiled form; the caller reports them.
    pub fn compile_rename_rules(&mut self) -> Result<(), regex::Error> {
        self.compiled_name_regex = if self.rename_name_regex.is_empty() {
            None
        } else {
            Some(Regex::new(&self.rename_name_regex)?)
        };
        self.compiled_group_regex = if self.rename_group_regex.is_empty() {
            None
        } else {
            Some(Regex::new(&self.rename_group_regex)?)
        };
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.guide_file != "-" && self.guide_channel_id != "-"
    }
}

/// One channel of a parsed input guide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuideChannel {
    pub id: String,
    pub display_names: Vec<String>,
    pub icon: String,
}

/// One program of a parsed input guide, carried through to the merged
/// output with only `channel` and the TZ suffix rewritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuideProgram {
    pub channel: String,
    /// `YYYYMMDDhhmmss ±HHMM`
    pub start: String,
    pub stop: String,
    pub title: String,
    pub sub_title: String,
    pub desc: String,
    pub categories: Vec<String>,
    pub credits: Credits,
    pub rating: Option<Rating>,
    pub icon: String,
    pub episode_nums: Vec<EpisodeNum>,
    pub video_quality: String,
    pub new: bool,
    pub live: bool,
    pub premiere: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credits {
    pub directors: Vec<String>,
    pub actors: Vec<String>,
}

impl Credits {
    pub fn is_empty(&self) -> bool {
        self.directors.is_empty() && self.actors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub system: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeNum {
    pub system: String,
    pub value: String,
}

/// A fully parsed input guide, indexed for the merge engine's
/// auto-binding pass.
#[derive(Debug, Clone, Default)]
pub struct Guide {
    pub channels: HashMap<String, GuideChannel>,
    pub programs_by_channel: HashMap<String, Vec<GuideProgram>>,
    /// space-stripped lowercased display-name -> channel id
    pub display_index: HashMap<String, String>,
}

impl Guide {
    /// Build the display-name index after parsing.
    pub fn build_display_index(&mut self) {
        for channel in self.channels.values() {
            for name in &channel.display_names {
                let key: String = name
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_lowercase();
                self.display_index.entry(key).or_insert_with(|| channel.id.clone());
            }
        }
    }
}

/// A user-defined stream filter rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FilterRule {
    /// Matches iff the stream's group title equals `rule` exactly.
    GroupTitle {
        rule: String,
        #[serde(default)]
        case_sensitive: bool,
        #[serde(default)]
        preserve_mapping: bool,
        #[serde(default)]
        starting_channel: Option<f64>,
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    /// Matches iff the stream's search corpus contains `rule`.
    Custom {
        rule: String,
        #[serde(default)]
        case_sensitive: bool,
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

/// Value side of the persisted `urls.json` map: resolves a client-facing
/// `/stream/<urlId>` back to its upstream origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamUrlEntry {
    pub url: String,
    pub name: String,
    pub playlist_id: String,
    pub channel_number: String,
}

/// A single user account for the optional file-endpoint authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_is_100_without_downloads() {
        let source = ProviderSource {
            id: "p1".into(),
            kind: ProviderKind::Playlist,
            name: "test".into(),
            source_location: "http://example.com/list.m3u".into(),
            uuid_key: String::new(),
            last_update: None,
            download_count: 0,
            error_count: 0,
        };
        assert_eq!(source.availability(), 100.0);
    }

    #[test]
    fn availability_tracks_error_ratio() {
        let source = ProviderSource {
            id: "p1".into(),
            kind: ProviderKind::Guide,
            name: "test".into(),
            source_location: "http://example.com/guide.xml".into(),
            uuid_key: String::new(),
            last_update: None,
            download_count: 10,
            error_count: 2,
        };
        assert_eq!(source.availability(), 80.0);
    }

    #[test]
    fn display_index_strips_spaces_and_folds_case() {
        let mut guide = Guide::default();
        guide.channels.insert(
            "bbc1".into(),
            GuideChannel {
                id: "bbc1".into(),
                display_names: vec!["BBC One HD".into()],
                icon: String::new(),
            },
        );
        guide.build_display_index();
        assert_eq!(guide.display_index.get("bbconehd"), Some(&"bbc1".to_string()));
    }

    #[test]
    fn rename_rules_compile_and_clear() {
        let mut channel = XepgChannel {
            rename_name_regex: "^BBC.*HD$".into(),
            ..Default::default()
        };
        channel.compile_rename_rules().unwrap();
        assert!(channel.compiled_name_regex.is_some());
        assert!(channel.compiled_group_regex.is_none());
    }
}
