//! Merged playlist writer.

use std::collections::BTreeMap;

use crate::models::{StreamUrlEntry, XepgChannel};
use crate::xepg::numbers::parse_channel_number;
use crate::xepg::XepgDb;

/// Render the merged M3U for every active channel, sorted by numeric
/// channel number ascending. Each emitted URL points back at this
/// proxy; the `urls` map records how to resolve it upstream again.
pub fn build_merged_m3u(
    db: &XepgDb,
    urls: &mut BTreeMap<String, StreamUrlEntry>,
    base_url: &str,
    guide_url: &str,
) -> String {
    let mut channels: Vec<&XepgChannel> =
        db.channels.values().filter(|c| c.x_active).collect();
    channels.sort_by(|a, b| {
        let left = parse_channel_number(&a.x_channel_number).unwrap_or(f64::MAX);
        let right = parse_channel_number(&b.x_channel_number).unwrap_or(f64::MAX);
        left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = String::with_capacity(channels.len() * 160 + 64);
    out.push_str(&format!(
        "#EXTM3U url-tvg=\"{guide_url}\" x-tvg-url=\"{guide_url}\"\n"
    ));

    for channel in channels {
        let url_id = super::url_id(&channel.provider_id, &channel.url);
        urls.insert(
            url_id.clone(),
            StreamUrlEntry {
                url: channel.url.clone(),
                name: channel.x_name.clone(),
                playlist_id: channel.provider_id.clone(),
                channel_number: channel.x_channel_number.clone(),
            },
        );

        let tvg_id = if channel.tvg_id.is_empty() {
            &channel.x_channel_number
        } else {
            &channel.tvg_id
        };
        out.push_str(&format!(
            "#EXTINF:0 channelID=\"{}\" tvg-chno=\"{}\" tvg-name=\"{}\" tvg-id=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}\n",
            channel.x_id,
            channel.x_channel_number,
            channel.x_name,
            tvg_id,
            channel.tvg_logo,
            channel.x_group_title,
            channel.x_name,
        ));
        out.push_str(&format!("{base_url}/stream/{url_id}\n"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::XepgChannel;

    fn channel(x_id: &str, number: &str, name: &str, active: bool) -> XepgChannel {
        XepgChannel {
            x_id: x_id.to_string(),
            provider_id: "p1".to_string(),
            name: name.to_string(),
            x_name: name.to_string(),
            x_group_title: "TV".to_string(),
            x_channel_number: number.to_string(),
            url: format!("http://upstream/{x_id}.ts"),
            guide_file: "<dummy>".to_string(),
            guide_channel_id: "60_Minutes".to_string(),
            x_active: active,
            ..Default::default()
        }
    }

    fn db_with(channels: Vec<XepgChannel>) -> XepgDb {
        let mut db = XepgDb::default();
        for channel in channels {
            db.channels.insert(channel.x_id.clone(), channel);
        }
        db
    }

    #[test]
    fn emits_active_channels_sorted_by_number() {
        let db = db_with(vec![
            channel("x-ID.0", "1002", "Charlie", true),
            channel("x-ID.1", "1000", "Alpha", true),
            channel("x-ID.2", "1001", "Bravo", true),
            channel("x-ID.3", "900", "Hidden", false),
        ]);
        let mut urls = BTreeMap::new();
        let m3u = build_merged_m3u(&db, &mut urls, "http://proxy:34400", "http://proxy:34400/xmltv/tvmux.xml");

        let extinf_lines: Vec<&str> =
            m3u.lines().filter(|l| l.starts_with("#EXTINF")).collect();
        assert_eq!(extinf_lines.len(), 3);
        assert!(extinf_lines[0].contains("Alpha"));
        assert!(extinf_lines[1].contains("Bravo"));
        assert!(extinf_lines[2].contains("Charlie"));
        assert!(!m3u.contains("Hidden"));
        assert_eq!(urls.len(), 3);
    }

    #[test]
    fn header_carries_the_guide_url_twice() {
        let db = db_with(vec![]);
        let mut urls = BTreeMap::new();
        let m3u = build_merged_m3u(&db, &mut urls, "http://h:1", "http://h:1/xmltv/tvmux.xml");
        let header = m3u.lines().next().unwrap();
        assert!(header.starts_with("#EXTM3U"));
        assert_eq!(header.matches("http://h:1/xmltv/tvmux.xml").count(), 2);
    }

    #[test]
    fn missing_tvg_id_falls_back_to_channel_number() {
        let db = db_with(vec![channel("x-ID.0", "1000", "Alpha", true)]);
        let mut urls = BTreeMap::new();
        let m3u = build_merged_m3u(&db, &mut urls, "http://h:1", "http://h:1/g");
        assert!(m3u.contains("tvg-id=\"1000\""));
    }

    #[test]
    fn fractional_numbers_sort_between_integers() {
        let db = db_with(vec![
            channel("x-ID.0", "102", "After", true),
            channel("x-ID.1", "101.1", "Between", true),
            channel("x-ID.2", "101", "Before", true),
        ]);
        let mut urls = BTreeMap::new();
        let m3u = build_merged_m3u(&db, &mut urls, "http://h:1", "http://h:1/g");
        let order: Vec<usize> = ["Before", "Between", "After"]
            .iter()
            .map(|n| m3u.find(n).unwrap())
            .collect();
        assert!(order[0] < order[1] && order[1] < order[2]);
    }
}
