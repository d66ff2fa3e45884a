//! Merged guide writer.
//!
//! One `<channel>` plus the bound programs for every active channel,
//! with the program's `channel` attribute rewritten to the output
//! channel number and the timezone suffix shifted by the channel's
//! timeshift. Channels bound to the dummy guide get a synthesized
//! fixed-slot schedule instead.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::warn;

use crate::models::{EpisodeNum, Guide, GuideProgram, XepgChannel};
use crate::xepg::numbers::parse_channel_number;
use crate::xepg::{XepgDb, DUMMY_GUIDE};

/// Slot lengths (minutes) the dummy guide accepts.
const DUMMY_SLOT_MINUTES: [i64; 7] = [30, 60, 90, 120, 180, 240, 360];
const DUMMY_DAYS: i64 = 4;

/// Render the merged XMLTV document.
pub fn build_merged_xmltv(
    db: &XepgDb,
    guides: &BTreeMap<String, Guide>,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, quick_xml::Error> {
    let mut channels: Vec<&XepgChannel> =
        db.channels.values().filter(|c| c.x_active).collect();
    channels.sort_by(|a, b| {
        let left = parse_channel_number(&a.x_channel_number).unwrap_or(f64::MAX);
        let right = parse_channel_number(&b.x_channel_number).unwrap_or(f64::MAX);
        left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut tv = BytesStart::new("tv");
    tv.push_attribute(("generator-info-name", "tvmux"));
    writer.write_event(Event::Start(tv))?;

    for channel in &channels {
        write_channel(&mut writer, channel)?;
    }
    for channel in &channels {
        if channel.guide_file == DUMMY_GUIDE {
            for program in dummy_programs(channel, now) {
                write_program(&mut writer, &program, channel)?;
            }
        } else if let Some(guide) = guides.get(&channel.guide_file) {
            if let Some(programs) = guide.programs_by_channel.get(&channel.guide_channel_id) {
                let shift = channel.x_timeshift.trim().parse::<i32>().unwrap_or(0);
                for program in programs {
                    let mut program = program.clone();
                    program.start = shift_timezone(&program.start, shift);
                    program.stop = shift_timezone(&program.stop, shift);
                    write_program(&mut writer, &program, channel)?;
                }
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new("tv")))?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_channel<W: std::io::Write>(
    writer: &mut Writer<W>,
    channel: &XepgChannel,
) -> Result<(), quick_xml::Error> {
    let mut elem = BytesStart::new("channel");
    elem.push_attribute(("id", channel.x_channel_number.as_str()));
    writer.write_event(Event::Start(elem))?;

    write_text_element(writer, "display-name", &channel.x_name)?;
    if !channel.tvg_logo.is_empty() {
        let mut icon = BytesStart::new("icon");
        icon.push_attribute(("src", channel.tvg_logo.as_str()));
        writer.write_event(Event::Empty(icon))?;
    }

    Ok(writer.write_event(Event::End(BytesEnd::new("channel")))?)
}

fn write_program<W: std::io::Write>(
    writer: &mut Writer<W>,
    program: &GuideProgram,
    channel: &XepgChannel,
) -> Result<(), quick_xml::Error> {
    let mut elem = BytesStart::new("programme");
    elem.push_attribute(("start", program.start.as_str()));
    elem.push_attribute(("stop", program.stop.as_str()));
    elem.push_attribute(("channel", channel.x_channel_number.as_str()));
    writer.write_event(Event::Start(elem))?;

    write_text_element(writer, "title", &program.title)?;
    if !program.sub_title.is_empty() {
        write_text_element(writer, "sub-title", &program.sub_title)?;
    }
    if !program.desc.is_empty() {
        write_text_element(writer, "desc", &program.desc)?;
    }
    for category in &program.categories {
        write_text_element(writer, "category", category)?;
    }
    if !program.credits.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("credits")))?;
        for director in &program.credits.directors {
            write_text_element(writer, "director", director)?;
        }
        for actor in &program.credits.actors {
            write_text_element(writer, "actor", actor)?;
        }
        writer.write_event(Event::End(BytesEnd::new("credits")))?;
    }
    if !program.icon.is_empty() {
        let mut icon = BytesStart::new("icon");
        icon.push_attribute(("src", program.icon.as_str()));
        writer.write_event(Event::Empty(icon))?;
    }
    for episode in &program.episode_nums {
        let mut elem = BytesStart::new("episode-num");
        if !episode.system.is_empty() {
            elem.push_attribute(("system", episode.system.as_str()));
        }
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(&episode.value)))?;
        writer.write_event(Event::End(BytesEnd::new("episode-num")))?;
    }
    if let Some(rating) = &program.rating {
        let mut elem = BytesStart::new("rating");
        if !rating.system.is_empty() {
            elem.push_attribute(("system", rating.system.as_str()));
        }
        writer.write_event(Event::Start(elem))?;
        write_text_element(writer, "value", &rating.value)?;
        writer.write_event(Event::End(BytesEnd::new("rating")))?;
    }

    let quality = effective_quality(program, channel);
    if !quality.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("video")))?;
        write_text_element(writer, "quality", &quality)?;
        writer.write_event(Event::End(BytesEnd::new("video")))?;
    }

    if program.new {
        writer.write_event(Event::Empty(BytesStart::new("new")))?;
    }
    if program.premiere {
        writer.write_event(Event::Empty(BytesStart::new("premiere")))?;
    }
    if program.live {
        writer.write_event(Event::Empty(BytesStart::new("live")))?;
    }

    Ok(writer.write_event(Event::End(BytesEnd::new("programme")))?)
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    Ok(writer.write_event(Event::End(BytesEnd::new(name)))?)
}

/// Fill an empty `<video><quality>` from the channel name: " HD" /
/// " FHD" mean HDTV, " UHD" / " 4K" mean UHDTV.
fn effective_quality(program: &GuideProgram, channel: &XepgChannel) -> String {
    if !program.video_quality.is_empty() {
        return program.video_quality.clone();
    }
    let name = channel.x_name.to_uppercase();
    if name.contains(" HD") || name.contains(" FHD") {
        "HDTV".to_string()
    } else if name.contains(" UHD") || name.contains(" 4K") {
        "UHDTV".to_string()
    } else {
        String::new()
    }
}

/// Add `shift * 100` to the numeric timezone suffix of an XMLTV time
/// (`YYYYMMDDhhmmss ±HHMM`). Unparseable values pass through.
pub fn shift_timezone(time: &str, shift: i32) -> String {
    if shift == 0 {
        return time.to_string();
    }
    let Some((datetime, offset)) = time.rsplit_once(' ') else {
        return time.to_string();
    };
    let Ok(value) = offset.parse::<i32>() else {
        return time.to_string();
    };
    format!("{datetime} {:+05}", value + shift * 100)
}

/// Synthesize the fixed-slot schedule for a dummy-bound channel:
/// 4 days of slots, slot length taken from the binding id (minutes).
fn dummy_programs(channel: &XepgChannel, now: DateTime<Utc>) -> Vec<GuideProgram> {
    let minutes = channel
        .guide_channel_id
        .split('_')
        .next()
        .and_then(|m| m.parse::<i64>().ok())
        .filter(|m| DUMMY_SLOT_MINUTES.contains(m))
        .unwrap_or_else(|| {
            warn!(
                "channel {}: invalid dummy slot '{}', using 30 minutes",
                channel.x_id, channel.guide_channel_id
            );
            30
        });

    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    let slots = DUMMY_DAYS * 24 * 60 / minutes;

    let mut programs = Vec::with_capacity(slots as usize);
    for i in 0..slots {
        let start = day_start + Duration::minutes(i * minutes);
        let stop = start + Duration::minutes(minutes);
        let mut program = GuideProgram {
            channel: channel.x_channel_number.clone(),
            start: start.format("%Y%m%d%H%M%S +0000").to_string(),
            stop: stop.format("%Y%m%d%H%M%S +0000").to_string(),
            title: format!(
                "{} ({}. {} - {})",
                channel.x_name,
                &start.format("%a").to_string()[..2],
                start.format("%H:%M"),
                stop.format("%H:%M"),
            ),
            desc: channel.x_description.clone(),
            ..Default::default()
        };
        if !channel.x_category.is_empty() {
            program.categories.push(channel.x_category.clone());
        }
        if channel.x_category != "Movie" {
            program.episode_nums.push(EpisodeNum {
                system: "original-air-date".to_string(),
                value: start.format("%Y-%m-%d %H:%M:%S").to_string(),
            });
        }
        programs.push(program);
    }
    programs
}
