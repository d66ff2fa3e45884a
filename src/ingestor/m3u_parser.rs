//! M3U playlist tokenizer.
//!
//! Turns a raw playlist into [`IngestedStream`] records: one
//! `#EXTINF:<duration> <attr-list>,<display-name>` line followed by a
//! URL line per entry, with `#EXTGRP` honored between the two.
//! Malformed entries are skipped, never fatal.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::models::{IngestedStream, ProviderSource};

/// Parse a playlist into the ordered list of its stream records.
///
/// A missing or absent `#EXTM3U` header yields an empty list, not an
/// error.
pub fn parse_playlist(content: &str, provider: &ProviderSource) -> Vec<IngestedStream> {
    let mut lines = content.lines().map(|l| l.trim_end_matches('\r').trim());

    // The first non-empty line must be the header.
    let header_ok = lines
        .clone()
        .find(|l| !l.is_empty())
        .map(|l| l.starts_with("#EXTM3U"))
        .unwrap_or(false);
    if !header_ok {
        warn!("playlist for provider '{}' has no #EXTM3U header", provider.name);
        return Vec::new();
    }

    let mut streams = Vec::new();
    let mut pending: Option<PendingEntry> = None;
    let mut seen_uuids: HashSet<String> = HashSet::new();

    for line in lines.by_ref() {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            pending = match parse_extinf(rest) {
                Some(entry) => Some(entry),
                None => {
                    warn!("skipping malformed EXTINF line: {line}");
                    None
                }
            };
        } else if let Some(group) = line.strip_prefix("#EXTGRP:") {
            if let Some(entry) = pending.as_mut() {
                if entry.group_hint.is_none() {
                    entry.group_hint = Some(group.trim().to_string());
                }
            }
        } else if line.starts_with('#') {
            continue;
        } else if let Some(entry) = pending.take() {
            if let Some(stream) = build_stream(entry, line, provider, &mut seen_uuids) {
                streams.push(stream);
            }
        }
    }

    debug!(
        "parsed {} streams from playlist provider '{}'",
        streams.len(),
        provider.name
    );
    streams
}

struct PendingEntry {
    attributes: Vec<(String, String)>,
    display_name: String,
    group_hint: Option<String>,
}

/// Parse the remainder of an EXTINF line (after the `#EXTINF:` prefix).
/// Returns `None` when the mandatory display-name comma is missing.
fn parse_extinf(rest: &str) -> Option<PendingEntry> {
    // Skip the duration token: an optional sign and digits/dot.
    let rest = rest.trim_start();
    let duration_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+' || c == '.'))
        .unwrap_or(rest.len());
    let rest = &rest[duration_end..];

    let (attr_part, display_name) = split_at_top_level_comma(rest)?;
    Some(PendingEntry {
        attributes: parse_attributes(attr_part),
        display_name: display_name.trim().to_string(),
        group_hint: None,
    })
}

/// Split at the first comma outside of double quotes. The attribute
/// list precedes it, the display name follows.
fn split_at_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Scan `key="value"` pairs. Keys compare case-insensitively; the first
/// occurrence of a key wins. Unquoted values run to the next whitespace.
fn parse_attributes(attributes: &str) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut chars = attributes.chars().peekable();

    loop {
        // Skip separators before the next key.
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        match chars.peek() {
            Some('"') => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    value.push(c);
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        if seen.insert(key.to_lowercase()) {
            attrs.push((key, value));
        }
    }

    attrs
}

fn build_stream(
    entry: PendingEntry,
    url: &str,
    provider: &ProviderSource,
    seen_uuids: &mut HashSet<String>,
) -> Option<IngestedStream> {
    let mut stream = IngestedStream {
        url: url.to_string(),
        provider_id: provider.id.clone(),
        name: entry.display_name,
        ..Default::default()
    };

    for (key, value) in &entry.attributes {
        match key.to_lowercase().as_str() {
            "tvg-id" => stream.tvg_id = value.clone(),
            "tvg-name" => stream.tvg_name = value.clone(),
            "tvg-logo" => stream.tvg_logo = value.clone(),
            "tvg-shift" => stream.tvg_shift = value.clone(),
            "group-title" => stream.group_title = value.clone(),
            _ => {
                stream.extra.insert(key.clone(), value.clone());
            }
        }
    }

    if stream.group_title.is_empty() {
        if let Some(group) = entry.group_hint {
            stream.group_title = group;
        }
    }
    if stream.name.is_empty() {
        stream.name = stream.tvg_name.clone();
    }
    if stream.name.is_empty() {
        warn!("skipping stream with no usable name: {url}");
        return None;
    }

    // UUID discovery: the first attribute with a recognized key prefix
    // and a non-empty value becomes the stream's stable id.
    for (key, value) in &entry.attributes {
        if value.is_empty() {
            continue;
        }
        let recognized = key.starts_with("CUID")
            || key.starts_with("channel-id")
            || (!provider.uuid_key.is_empty() && key.starts_with(provider.uuid_key.as_str()));
        if recognized {
            if seen_uuids.insert(value.clone()) {
                stream.uuid_key = key.clone();
                stream.uuid_value = value.clone();
            } else {
                warn!(
                    "duplicate uuid '{value}' in playlist '{}'; ignoring for stream '{}'",
                    provider.name, stream.name
                );
            }
            break;
        }
    }

    stream.build_search_corpus();
    Some(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    fn provider() -> ProviderSource {
        ProviderSource {
            id: "p1".into(),
            kind: ProviderKind::Playlist,
            name: "test".into(),
            source_location: "http://example.com/a.m3u".into(),
            uuid_key: String::new(),
            last_update: None,
            download_count: 0,
            error_count: 0,
        }
    }

    #[test]
    fn parses_entries_with_declared_attributes() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 tvg-id=\"cnn.us\" tvg-name=\"CNN\" tvg-logo=\"http://logo/cnn.png\" group-title=\"News\",CNN International\n",
            "http://example.com/cnn.ts\n",
            "#EXTINF:-1 group-title=\"Sports\",ESPN\n",
            "http://example.com/espn.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].name, "CNN International");
        assert_eq!(streams[0].tvg_id, "cnn.us");
        assert_eq!(streams[0].group_title, "News");
        assert_eq!(streams[0].url, "http://example.com/cnn.ts");
        assert_eq!(streams[1].name, "ESPN");
        assert_eq!(streams[0].search_corpus, "CNN International News cnn.us CNN");
    }

    #[test]
    fn missing_header_yields_empty_list() {
        let streams = parse_playlist("#EXTINF:-1,Test\nhttp://x/1.ts\n", &provider());
        assert!(streams.is_empty());
        assert!(parse_playlist("", &provider()).is_empty());
    }

    #[test]
    fn malformed_extinf_is_skipped_but_parsing_continues() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 tvg-id=\"broken\" no comma here\n",
            "http://example.com/broken.ts\n",
            "#EXTINF:-1,Good\n",
            "http://example.com/good.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name, "Good");
    }

    #[test]
    fn unknown_attributes_survive_under_their_literal_name() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 tvg-id=\"a\" Audio-Track=\"de\",One\n",
            "http://example.com/1.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams[0].extra.get("Audio-Track"), Some(&"de".to_string()));
    }

    #[test]
    fn duplicate_attribute_keeps_first_occurrence() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 tvg-id=\"first\" TVG-ID=\"second\",One\n",
            "http://example.com/1.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams[0].tvg_id, "first");
    }

    #[test]
    fn extgrp_sets_group_when_absent() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1,One\n",
            "#EXTGRP:Documentaries\n",
            "http://example.com/1.ts\n",
            "#EXTINF:-1 group-title=\"News\",Two\n",
            "#EXTGRP:Ignored\n",
            "http://example.com/2.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams[0].group_title, "Documentaries");
        assert_eq!(streams[1].group_title, "News");
    }

    #[test]
    fn quoted_commas_do_not_split_the_display_name() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 group-title=\"News, World\",BBC News\n",
            "http://example.com/bbc.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams[0].group_title, "News, World");
        assert_eq!(streams[0].name, "BBC News");
    }

    #[test]
    fn duplicate_uuid_values_are_dropped_after_the_first() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 CUID=\"42\",One\n",
            "http://example.com/1.ts\n",
            "#EXTINF:-1 CUID=\"42\",Two\n",
            "http://example.com/2.ts\n",
        );
        let streams = parse_playlist(playlist, &provider());
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].uuid_value, "42");
        assert_eq!(streams[0].uuid_key, "CUID");
        assert!(streams[1].uuid_value.is_empty());
    }

    #[test]
    fn provider_configured_uuid_key_is_recognized() {
        let mut source = provider();
        source.uuid_key = "xui-id".into();
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXTINF:-1 xui-id=\"555\",One\n",
            "http://example.com/1.ts\n",
        );
        let streams = parse_playlist(playlist, &source);
        assert_eq!(streams[0].uuid_value, "555");
    }
}
