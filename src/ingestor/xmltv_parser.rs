//! XMLTV guide parser.
//!
//! Streaming parse with quick-xml: one pass over the document,
//! collecting `<channel>` and `<programme>` elements into a [`Guide`]
//! indexed for the merge engine. Individual malformed elements are
//! skipped; only unreadable XML fails the whole file.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::errors::SourceError;
use crate::models::{Credits, EpisodeNum, Guide, GuideChannel, GuideProgram, Rating};

/// Parse an XMLTV document into an indexed guide.
pub fn parse_guide(content: &str) -> Result<Guide, SourceError> {
    let mut reader = Reader::from_reader(content.as_bytes());
    reader.config_mut().trim_text(true);

    let mut guide = Guide::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"channel" => {
                    if let Some(channel) = parse_channel(&mut reader, &e)? {
                        // Keep the first occurrence of a channel id.
                        guide
                            .channels
                            .entry(channel.id.clone())
                            .or_insert(channel);
                    }
                }
                b"programme" => {
                    if let Some(program) = parse_programme(&mut reader, &e)? {
                        guide
                            .programs_by_channel
                            .entry(program.channel.clone())
                            .or_default()
                            .push(program);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::parse(
                    "xmltv",
                    format!("XML error at position {}: {e}", reader.buffer_position()),
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    guide.build_display_index();
    debug!(
        "parsed guide: {} channels, {} channels with programs",
        guide.channels.len(),
        guide.programs_by_channel.len()
    );
    Ok(guide)
}

fn parse_channel(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<GuideChannel>, SourceError> {
    let Some(id) = get_attribute(start, b"id") else {
        warn!("skipping <channel> without id attribute");
        skip_to_end(reader, b"channel")?;
        return Ok(None);
    };

    let mut channel = GuideChannel {
        id,
        ..Default::default()
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"display-name" => {
                    let name = read_text(reader)?;
                    if !name.is_empty() {
                        channel.display_names.push(name);
                    }
                }
                b"icon" => {
                    if channel.icon.is_empty() {
                        channel.icon = get_attribute(&e, b"src").unwrap_or_default();
                    }
                    skip_to_end(reader, b"icon")?;
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"icon" && channel.icon.is_empty() {
                    channel.icon = get_attribute(&e, b"src").unwrap_or_default();
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"channel" => break,
            Ok(Event::Eof) => {
                return Err(SourceError::parse("xmltv", "unexpected EOF inside <channel>"))
            }
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(Some(channel))
}

fn parse_programme(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<GuideProgram>, SourceError> {
    let channel = get_attribute(start, b"channel");
    let start_time = get_attribute(start, b"start");
    let stop_time = get_attribute(start, b"stop");
    let (Some(channel), Some(start_time), Some(stop_time)) = (channel, start_time, stop_time)
    else {
        warn!("skipping <programme> with missing channel/start/stop");
        skip_to_end(reader, b"programme")?;
        return Ok(None);
    };

    let mut program = GuideProgram {
        channel,
        start: start_time,
        stop: stop_time,
        ..Default::default()
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"title" => program.title = read_text(reader)?,
                b"sub-title" => program.sub_title = read_text(reader)?,
                b"desc" => program.desc = read_text(reader)?,
                b"category" => {
                    let category = read_text(reader)?;
                    if !category.is_empty() {
                        program.categories.push(category);
                    }
                }
                b"credits" => program.credits = parse_credits(reader)?,
                b"rating" => {
                    let system = get_attribute(&e, b"system").unwrap_or_default();
                    let value = parse_rating_value(reader)?;
                    if !value.is_empty() {
                        program.rating = Some(Rating { system, value });
                    }
                }
                b"episode-num" => {
                    let system = get_attribute(&e, b"system").unwrap_or_default();
                    let value = read_text(reader)?;
                    if !value.is_empty() {
                        program.episode_nums.push(EpisodeNum { system, value });
                    }
                }
                b"icon" => {
                    if program.icon.is_empty() {
                        program.icon = get_attribute(&e, b"src").unwrap_or_default();
                    }
                    skip_to_end(reader, b"icon")?;
                }
                b"video" => program.video_quality = parse_video_quality(reader)?,
                b"new" => {
                    program.new = true;
                    skip_to_end(reader, b"new")?;
                }
                b"premiere" => {
                    program.premiere = true;
                    skip_to_end(reader, b"premiere")?;
                }
                b"live" => {
                    program.live = true;
                    skip_to_end(reader, b"live")?;
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"icon" => {
                    if program.icon.is_empty() {
                        program.icon = get_attribute(&e, b"src").unwrap_or_default();
                    }
                }
                b"new" => program.new = true,
                b"premiere" => program.premiere = true,
                b"live" => program.live = true,
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"programme" => break,
            Ok(Event::Eof) => {
                return Err(SourceError::parse("xmltv", "unexpected EOF inside <programme>"))
            }
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(Some(program))
}

fn parse_credits(reader: &mut Reader<&[u8]>) -> Result<Credits, SourceError> {
    let mut credits = Credits::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"director" => {
                    let name = read_text(reader)?;
                    if !name.is_empty() {
                        credits.directors.push(name);
                    }
                }
                b"actor" => {
                    let name = read_text(reader)?;
                    if !name.is_empty() {
                        credits.actors.push(name);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"credits" => break,
            Ok(Event::Eof) => {
                return Err(SourceError::parse("xmltv", "unexpected EOF inside <credits>"))
            }
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(credits)
}

fn parse_rating_value(reader: &mut Reader<&[u8]>) -> Result<String, SourceError> {
    let mut value = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"value" => value = read_text(reader)?,
            Ok(Event::End(e)) if e.name().as_ref() == b"rating" => break,
            Ok(Event::Eof) => {
                return Err(SourceError::parse("xmltv", "unexpected EOF inside <rating>"))
            }
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(value)
}

fn parse_video_quality(reader: &mut Reader<&[u8]>) -> Result<String, SourceError> {
    let mut quality = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"quality" => quality = read_text(reader)?,
            Ok(Event::End(e)) if e.name().as_ref() == b"video" => break,
            Ok(Event::Eof) => {
                return Err(SourceError::parse("xmltv", "unexpected EOF inside <video>"))
            }
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(quality)
}

/// Collect text until the end of the element whose Start event was just
/// consumed.
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, SourceError> {
    let mut out = String::new();
    let mut buf = Vec::new();
    let mut depth = 0u32;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| SourceError::parse("xmltv", e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return Err(SourceError::parse("xmltv", "unexpected EOF in text")),
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

/// Consume events until the named element closes.
fn skip_to_end(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<(), SourceError> {
    let mut buf = Vec::new();
    let mut depth = 0u32;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == name => depth += 1,
            Ok(Event::End(e)) if e.name().as_ref() == name => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return Ok(()),
            Err(e) => return Err(SourceError::parse("xmltv", e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn get_attribute(element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok())
        .map(|v| v.into_owned())
}
