//! Channel identity and merge engine.
//!
//! Reconciles each refresh's ingested streams with the persisted
//! channel table: stable `x-ID.<n>` keys, unique display numbers,
//! regex-driven rename adoption, and automatic guide binding. The
//! table is the authoritative identity store and is rewritten
//! atomically after every merge.

pub mod numbers;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{AppError, PersistError};
use crate::models::{Guide, IngestedStream, XepgChannel};
use crate::persist;
use numbers::NumberPool;

/// Sentinel guide-file id selecting the synthesized dummy schedule.
pub const DUMMY_GUIDE: &str = "<dummy>";
/// Sentinel for "no value" in binding fields.
pub const UNSET: &str = "-";

const X_ID_PREFIX: &str = "x-ID.";

/// The persisted channel table, keyed by `x_id`.
#[derive(Debug, Default, Clone)]
pub struct XepgDb {
    pub channels: BTreeMap<String, XepgChannel>,
}

/// Counters describing one merge run, for logging and admin status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub matched: usize,
    pub created: usize,
    pub renamed: usize,
    pub bound: usize,
    pub deactivated: usize,
    pub deleted: usize,
}

impl XepgDb {
    /// Load the table from `xepg.json`; a missing file is an empty
    /// table. Rename regexes are compiled on load; invalid patterns
    /// are reported and left disabled.
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut channels: BTreeMap<String, XepgChannel> = persist::read_json(path)?;
        for (x_id, channel) in channels.iter_mut() {
            channel.x_id = x_id.clone();
            if let Err(e) = channel.compile_rename_rules() {
                warn!("channel {}: invalid rename regex: {e}", x_id);
                channel.compiled_name_regex = None;
                channel.compiled_group_regex = None;
            }
        }
        Ok(Self { channels })
    }

    /// Atomically rewrite `xepg.json`. A failure leaves the previous
    /// file intact and must abort the surrounding merge.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::write_json_atomic(path, &self.channels)
    }

    /// Smallest non-negative `n` such that `x-ID.<n>` is unused.
    fn next_x_id(&self) -> String {
        let used: HashSet<u64> = self
            .channels
            .keys()
            .filter_map(|k| k.strip_prefix(X_ID_PREFIX))
            .filter_map(|n| n.parse().ok())
            .collect();
        let mut n = 0u64;
        while used.contains(&n) {
            n += 1;
        }
        format!("{X_ID_PREFIX}{n}")
    }

    /// Check the table's structural invariants. A violation is fatal
    /// for the emit path.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut numbers = HashSet::new();
        for (key, channel) in &self.channels {
            if channel.x_id != *key {
                return Err(AppError::invariant(format!(
                    "channel key {key} disagrees with x_id {}",
                    channel.x_id
                )));
            }
            if channel.x_channel_number.is_empty() {
                return Err(AppError::invariant(format!("channel {key} has no number")));
            }
            if !numbers.insert(channel.x_channel_number.clone()) {
                return Err(AppError::invariant(format!(
                    "duplicate channel number {}",
                    channel.x_channel_number
                )));
            }
            if channel.x_active && !channel.is_bound() {
                return Err(AppError::invariant(format!(
                    "active channel {key} has no guide binding"
                )));
            }
        }
        Ok(())
    }

    /// Reconcile one batch of (already filtered) streams with the
    /// table, then bind, verify, and clean up. `guides` must hold the
    /// parsed guide of every configured guide provider (stale cached
    /// copies included), keyed by provider id.
    pub fn merge(
        &mut self,
        streams: Vec<IngestedStream>,
        settings: &Settings,
        guides: &BTreeMap<String, Guide>,
    ) -> MergeReport {
        let mut report = MergeReport::default();

        let mut by_hash: HashMap<String, String> = HashMap::new();
        let mut by_uuid: HashMap<(String, String, String), String> = HashMap::new();
        let mut by_name: HashMap<(String, String), String> = HashMap::new();
        for (x_id, channel) in &self.channels {
            by_hash.insert(channel.hash.clone(), x_id.clone());
            if !channel.uuid_value.is_empty() {
                by_uuid.insert(
                    (
                        channel.provider_id.clone(),
                        channel.uuid_key.clone(),
                        channel.uuid_value.clone(),
                    ),
                    x_id.clone(),
                );
            }
            by_name.insert(
                (channel.provider_id.clone(), channel.name.clone()),
                x_id.clone(),
            );
        }

        let mut pool =
            NumberPool::from_numbers(self.channels.values().map(|c| c.x_channel_number.as_str()));
        let mut active_names: HashSet<(String, String)> = HashSet::new();

        for stream in streams {
            active_names.insert((stream.provider_id.clone(), stream.name.clone()));
            let hash = channel_hash(&stream);
            let stream_has_uuid = !stream.uuid_value.is_empty();

            let matched: Option<(String, bool, bool)> = if let Some(x_id) = by_hash.get(&hash) {
                Some((x_id.clone(), stream_has_uuid, false))
            } else if stream_has_uuid {
                by_uuid
                    .get(&(
                        stream.provider_id.clone(),
                        stream.uuid_key.clone(),
                        stream.uuid_value.clone(),
                    ))
                    .map(|x_id| (x_id.clone(), true, false))
            } else {
                None
            };
            let matched = matched.or_else(|| {
                by_name
                    .get(&(stream.provider_id.clone(), stream.name.clone()))
                    .map(|x_id| (x_id.clone(), false, false))
            });
            let matched =
                matched.or_else(|| self.rename_match(&stream).map(|x_id| (x_id, false, true)));

            match matched {
                Some((x_id, has_uuid, renamed)) => {
                    let channel = self
                        .channels
                        .get_mut(&x_id)
                        .expect("index points at existing channel");
                    if renamed {
                        report.renamed += 1;
                        channel.x_name = stream.name.clone();
                    } else {
                        report.matched += 1;
                    }
                    by_hash.insert(hash.clone(), x_id.clone());
                    by_name.insert(
                        (stream.provider_id.clone(), stream.name.clone()),
                        x_id.clone(),
                    );
                    if stream_has_uuid {
                        by_uuid.insert(
                            (
                                stream.provider_id.clone(),
                                stream.uuid_key.clone(),
                                stream.uuid_value.clone(),
                            ),
                            x_id.clone(),
                        );
                    }
                    apply_update(channel, &stream, hash, has_uuid);
                }
                None => {
                    let x_id = self.next_x_id();
                    let channel = create_channel(&x_id, &stream, hash.clone(), settings, &mut pool);
                    by_hash.insert(hash, x_id.clone());
                    by_name.insert(
                        (stream.provider_id.clone(), stream.name.clone()),
                        x_id.clone(),
                    );
                    if stream_has_uuid {
                        by_uuid.insert(
                            (
                                stream.provider_id.clone(),
                                stream.uuid_key.clone(),
                                stream.uuid_value.clone(),
                            ),
                            x_id.clone(),
                        );
                    }
                    self.channels.insert(x_id, channel);
                    report.created += 1;
                }
            }
        }

        report.bound = self.auto_bind(settings, guides);
        report.deactivated = self.verify_bindings(guides);
        report.deleted = self.cleanup(&active_names, settings);

        info!(
            "merge: {} matched, {} created, {} renamed, {} bound, {} deactivated, {} deleted",
            report.matched,
            report.created,
            report.renamed,
            report.bound,
            report.deactivated,
            report.deleted
        );
        report
    }

    /// Step 4 of the matching order: a channel of the same provider
    /// whose rename regex matches the incoming name adopts the stream.
    fn rename_match(&self, stream: &IngestedStream) -> Option<String> {
        for (x_id, channel) in &self.channels {
            if channel.provider_id != stream.provider_id || channel.name == stream.name {
                continue;
            }
            let Some(name_regex) = &channel.compiled_name_regex else {
                continue;
            };
            if !name_regex.is_match(&stream.name) {
                continue;
            }
            if let Some(group_regex) = &channel.compiled_group_regex {
                if !group_regex.is_match(&channel.x_group_title) {
                    continue;
                }
            }
            debug!(
                "rename rule on {} adopts stream '{}' (was '{}')",
                x_id, stream.name, channel.name
            );
            return Some(x_id.clone());
        }
        None
    }

    /// Bind every unbound channel to a guide: the configured dummy
    /// schedule when enabled, otherwise the first guide file resolving
    /// the channel by tvg-id or by normalized display name. Successful
    /// binding activates the channel.
    fn auto_bind(&mut self, settings: &Settings, guides: &BTreeMap<String, Guide>) -> usize {
        let mut bound = 0;
        for channel in self.channels.values_mut() {
            let unbound = (channel.guide_file == UNSET || channel.guide_file.is_empty())
                && (channel.guide_channel_id == UNSET || channel.guide_channel_id.is_empty());
            if !unbound {
                continue;
            }

            if settings.default_missing_epg != UNSET {
                channel.guide_file = DUMMY_GUIDE.to_string();
                channel.guide_channel_id = settings.default_missing_epg.clone();
                channel.x_mapping = settings.default_missing_epg.clone();
                channel.x_active = true;
                bound += 1;
                continue;
            }

            let name_key: String = channel
                .x_name
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();

            for (file_id, guide) in guides {
                let hit = if !channel.tvg_id.is_empty() && guide.channels.contains_key(&channel.tvg_id)
                {
                    Some(channel.tvg_id.clone())
                } else {
                    guide.display_index.get(&name_key).cloned()
                };
                if let Some(guide_channel_id) = hit {
                    if let Some(entry) = guide.channels.get(&guide_channel_id) {
                        if !entry.icon.is_empty() {
                            channel.tvg_logo = entry.icon.clone();
                        }
                    }
                    channel.guide_file = file_id.clone();
                    channel.guide_channel_id = guide_channel_id.clone();
                    channel.x_mapping = guide_channel_id;
                    channel.x_active = true;
                    bound += 1;
                    break;
                }
            }
        }
        bound
    }

    /// Deactivate active channels whose binding no longer resolves.
    fn verify_bindings(&mut self, guides: &BTreeMap<String, Guide>) -> usize {
        let mut deactivated = 0;
        for channel in self.channels.values_mut() {
            if !channel.x_active || channel.guide_file == DUMMY_GUIDE {
                continue;
            }
            let resolves = guides
                .get(&channel.guide_file)
                .map(|g| g.channels.contains_key(&channel.guide_channel_id))
                .unwrap_or(false);
            if !resolves {
                warn!(
                    "channel {} lost its guide binding {}:{}",
                    channel.x_id, channel.guide_file, channel.guide_channel_id
                );
                channel.x_active = false;
                channel.guide_file = UNSET.to_string();
                channel.guide_channel_id = UNSET.to_string();
                deactivated += 1;
            }
        }
        deactivated
    }

    /// Drop channels whose upstream stream vanished or whose provider
    /// is no longer configured.
    fn cleanup(&mut self, active_names: &HashSet<(String, String)>, settings: &Settings) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, channel| {
            let seen = active_names
                .contains(&(channel.provider_id.clone(), channel.name.clone()));
            let provider_exists = settings.provider(&channel.provider_id).is_some();
            seen && provider_exists
        });
        before - self.channels.len()
    }
}

/// md5 over the identity tuple; the primary match key.
pub fn channel_hash(stream: &IngestedStream) -> String {
    let input = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        stream.provider_id,
        stream.name,
        stream.group_title,
        stream.tvg_id,
        stream.tvg_name,
        stream.uuid_key,
        stream.uuid_value
    );
    format!("{:x}", md5::compute(input))
}

/// Refresh a matched channel from its upstream stream.
fn apply_update(channel: &mut XepgChannel, stream: &IngestedStream, hash: String, has_uuid: bool) {
    channel.hash = hash;
    channel.has_uuid = has_uuid;
    channel.url = stream.url.clone();
    channel.name = stream.name.clone();
    channel.group_title = stream.group_title.clone();
    channel.tvg_id = stream.tvg_id.clone();
    channel.tvg_name = stream.tvg_name.clone();
    channel.tvg_shift = stream.tvg_shift.clone();
    channel.uuid_key = stream.uuid_key.clone();
    channel.uuid_value = stream.uuid_value.clone();

    if channel.update_icon {
        channel.tvg_logo = stream.tvg_logo.clone();
    }
    if channel.update_name && has_uuid {
        channel.x_name = stream.name.clone();
    }
    if channel.update_group {
        channel.x_group_title = stream.group_title.clone();
    }
}

fn create_channel(
    x_id: &str,
    stream: &IngestedStream,
    hash: String,
    settings: &Settings,
    pool: &mut NumberPool,
) -> XepgChannel {
    let start = if stream.preserve_mapping {
        numbers::parse_channel_number(&stream.uuid_value).unwrap_or(settings.first_channel)
    } else {
        stream.starting_channel.unwrap_or(settings.first_channel)
    };
    let number = pool.allocate(start);

    XepgChannel {
        x_id: x_id.to_string(),
        hash,
        provider_id: stream.provider_id.clone(),
        name: stream.name.clone(),
        group_title: stream.group_title.clone(),
        tvg_id: stream.tvg_id.clone(),
        tvg_name: stream.tvg_name.clone(),
        tvg_logo: stream.tvg_logo.clone(),
        tvg_shift: stream.tvg_shift.clone(),
        url: stream.url.clone(),
        uuid_key: stream.uuid_key.clone(),
        uuid_value: stream.uuid_value.clone(),
        x_name: stream.name.clone(),
        x_group_title: stream.group_title.clone(),
        x_channel_number: number,
        x_timeshift: stream.tvg_shift.clone(),
        guide_file: UNSET.to_string(),
        guide_channel_id: UNSET.to_string(),
        x_mapping: UNSET.to_string(),
        update_icon: true,
        has_uuid: !stream.uuid_value.is_empty(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GuideChannel, ProviderKind, ProviderSource};

    fn settings_with_provider(ids: &[&str]) -> Settings {
        let mut settings = Settings::default();
        settings.first_channel = 1000.0;
        settings.default_missing_epg = "-".to_string();
        for id in ids {
            settings.providers.push(ProviderSource {
                id: (*id).to_string(),
                kind: ProviderKind::Playlist,
                name: format!("provider {id}"),
                source_location: format!("http://example.com/{id}.m3u"),
                uuid_key: String::new(),
                last_update: None,
                download_count: 0,
                error_count: 0,
            });
        }
        settings
    }

    fn stream(provider: &str, name: &str, group: &str) -> IngestedStream {
        let mut stream = IngestedStream {
            provider_id: provider.to_string(),
            name: name.to_string(),
            group_title: group.to_string(),
            url: format!("http://upstream/{name}.ts").replace(' ', "_"),
            ..Default::default()
        };
        stream.build_search_corpus();
        stream
    }

    fn guide_with(id: &str, names: &[&str]) -> Guide {
        let mut guide = Guide::default();
        guide.channels.insert(
            id.to_string(),
            GuideChannel {
                id: id.to_string(),
                display_names: names.iter().map(|s| s.to_string()).collect(),
                icon: String::new(),
            },
        );
        guide.build_display_index();
        guide
    }

    #[test]
    fn merging_twice_is_stable() {
        let settings = settings_with_provider(&["p1"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        let batch = || vec![stream("p1", "CNN", "News"), stream("p1", "BBC One", "UK")];
        db.merge(batch(), &settings, &guides);
        let snapshot: Vec<(String, String, String, String)> = db
            .channels
            .values()
            .map(|c| {
                (
                    c.x_id.clone(),
                    c.x_channel_number.clone(),
                    c.guide_file.clone(),
                    c.guide_channel_id.clone(),
                )
            })
            .collect();

        let report = db.merge(batch(), &settings, &guides);
        assert_eq!(report.created, 0);
        assert_eq!(report.matched, 2);
        let after: Vec<(String, String, String, String)> = db
            .channels
            .values()
            .map(|c| {
                (
                    c.x_id.clone(),
                    c.x_channel_number.clone(),
                    c.guide_file.clone(),
                    c.guide_channel_id.clone(),
                )
            })
            .collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn numbers_are_unique_and_monotonic() {
        let settings = settings_with_provider(&["p1"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        db.merge(
            vec![
                stream("p1", "One", "A"),
                stream("p1", "Two", "A"),
                stream("p1", "Three", "A"),
            ],
            &settings,
            &guides,
        );
        let mut numbers: Vec<String> = db
            .channels
            .values()
            .map(|c| c.x_channel_number.clone())
            .collect();
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 3);
        assert!(numbers.contains(&"1000".to_string()));
        assert!(numbers.contains(&"1002".to_string()));

        // Delete "Two" upstream, add "Four". "Two" still holds 1001
        // while "Four" is created within the same merge, so "Four"
        // takes the next integer beyond the batch.
        db.merge(
            vec![
                stream("p1", "One", "A"),
                stream("p1", "Three", "A"),
                stream("p1", "Four", "A"),
            ],
            &settings,
            &guides,
        );
        let four = db
            .channels
            .values()
            .find(|c| c.name == "Four")
            .expect("created");
        assert_eq!(four.x_channel_number, "1003");
        let taken: HashSet<&str> = db
            .channels
            .values()
            .map(|c| c.x_channel_number.as_str())
            .collect();
        assert_eq!(taken.len(), db.channels.len());

        // The next merge sees 1001 free again and hands it to a
        // newcomer.
        db.merge(
            vec![
                stream("p1", "One", "A"),
                stream("p1", "Three", "A"),
                stream("p1", "Four", "A"),
                stream("p1", "Five", "A"),
            ],
            &settings,
            &guides,
        );
        let five = db
            .channels
            .values()
            .find(|c| c.name == "Five")
            .expect("created");
        assert_eq!(five.x_channel_number, "1001");
    }

    #[test]
    fn preserve_mapping_uses_uuid_number() {
        let settings = settings_with_provider(&["p1"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        let mut preserved = stream("p1", "Life", "TV");
        preserved.uuid_key = "CUID".into();
        preserved.uuid_value = "42".into();
        preserved.preserve_mapping = true;
        db.merge(vec![preserved], &settings, &guides);
        let channel = db.channels.values().next().unwrap();
        assert_eq!(channel.x_channel_number, "42");

        // A preserved channel from another provider wants the same
        // number; 42 is taken, so it falls to the next integer.
        let settings = settings_with_provider(&["p1", "p2"]);
        let mut life = stream("p1", "Life", "TV");
        life.uuid_key = "CUID".into();
        life.uuid_value = "42".into();
        life.preserve_mapping = true;
        let mut second = stream("p2", "Life 2", "TV");
        second.uuid_key = "CUID".into();
        second.uuid_value = "42".into();
        second.preserve_mapping = true;
        db.merge(vec![life, second], &settings, &guides);
        let second = db.channels.values().find(|c| c.name == "Life 2").unwrap();
        assert_eq!(second.x_channel_number, "43");
    }

    #[test]
    fn rename_regex_adopts_renamed_stream() {
        let settings = settings_with_provider(&["p1"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        db.merge(vec![stream("p1", "BBC One", "UK")], &settings, &guides);
        let x_id = db.channels.keys().next().unwrap().clone();
        {
            let channel = db.channels.get_mut(&x_id).unwrap();
            channel.rename_name_regex = "^BBC.*HD$".to_string();
            channel.compile_rename_rules().unwrap();
        }

        let report = db.merge(vec![stream("p1", "BBC One HD", "UK")], &settings, &guides);
        assert_eq!(report.renamed, 1);
        assert_eq!(report.created, 0);
        let channel = db.channels.get(&x_id).expect("same identity retained");
        assert_eq!(channel.x_name, "BBC One HD");
        assert_eq!(channel.name, "BBC One HD");
    }

    #[test]
    fn rename_group_regex_must_match_channel_group() {
        let settings = settings_with_provider(&["p1"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        db.merge(vec![stream("p1", "BBC One", "UK")], &settings, &guides);
        let x_id = db.channels.keys().next().unwrap().clone();
        {
            let channel = db.channels.get_mut(&x_id).unwrap();
            channel.rename_name_regex = "^BBC.*HD$".to_string();
            channel.rename_group_regex = "^Sports$".to_string();
            channel.compile_rename_rules().unwrap();
        }

        // Group regex does not match the channel's own group, so the
        // renamed stream creates a fresh channel instead.
        let report = db.merge(vec![stream("p1", "BBC One HD", "UK")], &settings, &guides);
        assert_eq!(report.renamed, 0);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn uuid_match_survives_name_change() {
        let settings = settings_with_provider(&["p1"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        let mut first = stream("p1", "Channel A", "TV");
        first.uuid_key = "CUID".into();
        first.uuid_value = "abc".into();
        db.merge(vec![first], &settings, &guides);
        let x_id = db.channels.keys().next().unwrap().clone();

        let mut renamed = stream("p1", "Channel A Plus", "TV");
        renamed.uuid_key = "CUID".into();
        renamed.uuid_value = "abc".into();
        let report = db.merge(vec![renamed], &settings, &guides);
        assert_eq!(report.created, 0);
        let channel = db.channels.get(&x_id).unwrap();
        assert_eq!(channel.name, "Channel A Plus");
        assert!(channel.has_uuid);
    }

    #[test]
    fn cleanup_deletes_vanished_and_orphaned_channels() {
        let settings = settings_with_provider(&["p1", "p2"]);
        let guides = BTreeMap::new();
        let mut db = XepgDb::default();

        db.merge(
            vec![stream("p1", "Keep", "A"), stream("p2", "Orphan", "B")],
            &settings,
            &guides,
        );
        assert_eq!(db.channels.len(), 2);

        // p2 removed from settings: its channel goes on the next merge
        // even though the stream still appears upstream.
        let narrowed = settings_with_provider(&["p1"]);
        let report = db.merge(
            vec![stream("p1", "Keep", "A"), stream("p2", "Orphan", "B")],
            &narrowed,
            &guides,
        );
        assert_eq!(report.deleted, 1);
        assert!(db.channels.values().all(|c| c.provider_id == "p1"));

        // A pair that vanishes upstream is deleted as well.
        let report = db.merge(vec![], &narrowed, &guides);
        assert_eq!(report.deleted, 1);
        assert!(db.channels.is_empty());
    }

    #[test]
    fn auto_bind_prefers_tvg_id_then_display_name() {
        let settings = settings_with_provider(&["p1"]);
        let mut guides = BTreeMap::new();
        guides.insert("g1".to_string(), guide_with("bbc1.uk", &["BBC One"]));

        let mut db = XepgDb::default();
        let mut by_id = stream("p1", "Anything", "UK");
        by_id.tvg_id = "bbc1.uk".into();
        let by_name = stream("p1", "BBC One", "UK");
        db.merge(vec![by_id, by_name], &settings, &guides);

        for channel in db.channels.values() {
            assert_eq!(channel.guide_file, "g1");
            assert_eq!(channel.guide_channel_id, "bbc1.uk");
            assert!(channel.x_active);
        }
    }

    #[test]
    fn default_missing_epg_binds_dummy_and_activates() {
        let mut settings = settings_with_provider(&["p1"]);
        settings.default_missing_epg = "60_Minutes".to_string();
        let guides = BTreeMap::new();

        let mut db = XepgDb::default();
        db.merge(vec![stream("p1", "NoGuide", "Misc")], &settings, &guides);
        let channel = db.channels.values().next().unwrap();
        assert_eq!(channel.guide_file, DUMMY_GUIDE);
        assert_eq!(channel.guide_channel_id, "60_Minutes");
        assert!(channel.x_active);
    }

    #[test]
    fn verification_deactivates_stale_bindings() {
        let settings = settings_with_provider(&["p1"]);
        let mut guides = BTreeMap::new();
        guides.insert("g1".to_string(), guide_with("bbc1.uk", &["BBC One"]));

        let mut db = XepgDb::default();
        db.merge(vec![stream("p1", "BBC One", "UK")], &settings, &guides);
        assert!(db.channels.values().next().unwrap().x_active);

        // The guide channel disappears: the binding is reset.
        guides.insert("g1".to_string(), guide_with("other", &["Other"]));
        let report = db.merge(vec![stream("p1", "BBC One", "UK")], &settings, &guides);
        assert_eq!(report.deactivated, 1);
        let channel = db.channels.values().next().unwrap();
        assert!(!channel.x_active);
        assert_eq!(channel.guide_file, UNSET);
    }

    #[test]
    fn validate_flags_duplicate_numbers() {
        let mut db = XepgDb::default();
        for (n, name) in ["a", "b"].iter().enumerate() {
            let mut channel = XepgChannel {
                x_id: format!("x-ID.{n}"),
                name: (*name).to_string(),
                x_channel_number: "1000".to_string(),
                ..Default::default()
            };
            channel.guide_file = UNSET.into();
            channel.guide_channel_id = UNSET.into();
            db.channels.insert(channel.x_id.clone(), channel);
        }
        assert!(matches!(db.validate(), Err(AppError::Invariant { .. })));
    }

    #[test]
    fn xepg_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xepg.json");
        let settings = settings_with_provider(&["p1"]);
        let mut db = XepgDb::default();
        db.merge(vec![stream("p1", "CNN", "News")], &settings, &BTreeMap::new());
        db.save(&path).unwrap();

        let loaded = XepgDb::load(&path).unwrap();
        assert_eq!(loaded.channels.len(), 1);
        let channel = loaded.channels.values().next().unwrap();
        assert_eq!(channel.name, "CNN");
        assert_eq!(channel.x_channel_number, "1000");
    }
}
