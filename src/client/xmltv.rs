//! XMLTV guide parsing with `quick-xml`'s streaming reader.
//!
//! Guide documents are large enough (§4.2 notes a 30s read timeout on the
//! fetch) that building a DOM is wasteful; `<channel>`/`<programme>` events
//! are consumed one at a time and folded directly into the per-channel
//! program lists the Program Cache wants.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::model::ProgramEntry;

#[derive(Debug, Default)]
pub struct XmltvGuide {
    /// lcn/number (the number used in events/sessions) -> channel id
    pub channel_ids: HashMap<String, String>,
    /// channel id -> ordered program list
    pub programs: HashMap<String, Vec<ProgramEntry>>,
}

impl XmltvGuide {
    /// Current program airing on `channel_id` at `now` (Unix seconds), found
    /// by scanning for `start <= now < stop`.
    pub fn current_program(&self, channel_id: &str, now: u64) -> Option<&ProgramEntry> {
        self.programs
            .get(channel_id)?
            .iter()
            .find(|p| p.start <= now && now < p.stop)
    }
}

/// Parses an XMLTV timestamp of the form `20240115120000 +0000` into Unix
/// seconds, converting through `tz` when the document carries no offset.
fn parse_xmltv_time(raw: &str, tz: &Tz) -> Option<u64> {
    let raw = raw.trim();
    let (datetime_part, offset_part) = raw.split_once(' ').unwrap_or((raw, ""));
    if datetime_part.len() < 14 {
        return None;
    }

    let naive = chrono::NaiveDateTime::parse_from_str(&datetime_part[..14], "%Y%m%d%H%M%S").ok()?;

    let utc = if offset_part.is_empty() {
        tz.from_local_datetime(&naive).single()?.with_timezone(&chrono::Utc)
    } else {
        let offset_secs = parse_offset(offset_part)?;
        let fixed = chrono::FixedOffset::east_opt(offset_secs)?;
        fixed
            .from_local_datetime(&naive)
            .single()?
            .with_timezone(&chrono::Utc)
    };

    Some(utc.timestamp() as u64)
}

fn parse_offset(raw: &str) -> Option<i32> {
    if raw.len() != 5 {
        return None;
    }
    let sign = match &raw[0..1] {
        "+" => 1,
        "-" => -1,
        _ => return None,
    };
    let hours: i32 = raw[1..3].parse().ok()?;
    let mins: i32 = raw[3..5].parse().ok()?;
    Some(sign * (hours * 3600 + mins * 60))
}

pub fn parse_xmltv(xml: &str, tz: &Tz) -> XmltvGuide {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut guide = XmltvGuide::default();
    let mut buf = Vec::new();

    let mut cur_programme_channel: Option<String> = None;
    let mut cur_programme_start: Option<u64> = None;
    let mut cur_programme_stop: Option<u64> = None;
    let mut cur_title = String::new();
    let mut cur_desc: Option<String> = None;
    let mut cur_icon: Option<String> = None;
    let mut in_title = false;
    let mut in_desc = false;
    let mut cur_channel_id: Option<String> = None;
    let mut in_display_name = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"channel" => {
                    cur_channel_id = attr(e, b"id");
                }
                b"display-name" if cur_channel_id.is_some() => {
                    in_display_name = true;
                }
                b"programme" => {
                    cur_programme_channel = attr(e, b"channel");
                    cur_programme_start = attr(e, b"start").and_then(|s| parse_xmltv_time(&s, tz));
                    cur_programme_stop = attr(e, b"stop").and_then(|s| parse_xmltv_time(&s, tz));
                    cur_title.clear();
                    cur_desc = None;
                    cur_icon = None;
                }
                b"title" => in_title = true,
                b"desc" => in_desc = true,
                b"icon" => {
                    cur_icon = attr(e, b"src");
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().into_owned();
                if in_title {
                    cur_title = text;
                } else if in_desc {
                    cur_desc = Some(text);
                } else if in_display_name {
                    if let Some(id) = &cur_channel_id {
                        // The first display-name seen for a channel is its lcn
                        // (the number events/sessions reference); later
                        // display-name entries (friendly names) are ignored.
                        guide.channel_ids.entry(text).or_insert_with(|| id.clone());
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"title" => in_title = false,
                b"desc" => in_desc = false,
                b"display-name" => in_display_name = false,
                b"channel" => cur_channel_id = None,
                b"programme" => {
                    if let (Some(channel), Some(start), Some(stop)) =
                        (cur_programme_channel.take(), cur_programme_start.take(), cur_programme_stop.take())
                    {
                        guide.programs.entry(channel).or_default().push(ProgramEntry {
                            start,
                            stop,
                            title: std::mem::take(&mut cur_title),
                            description: cur_desc.take(),
                            icon: cur_icon.take(),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    for list in guide.programs.values_mut() {
        list.sort_by_key(|p| p.start);
    }

    guide
}

fn attr(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<tv>
  <channel id="I137.json.schedulesdirect.org">
    <display-name>137</display-name>
  </channel>
  <programme start="20240115120000 +0000" stop="20240115123000 +0000" channel="I137.json.schedulesdirect.org">
    <title>Morning Show</title>
    <desc>A show.</desc>
    <icon src="http://example.com/icon.png"/>
  </programme>
</tv>"#;

    #[test]
    fn parses_channel_and_programme() {
        let guide = parse_xmltv(SAMPLE, &chrono_tz::UTC);
        assert_eq!(
            guide.channel_ids.get("137").map(String::as_str),
            Some("I137.json.schedulesdirect.org")
        );
        let programs = guide.programs.get("I137.json.schedulesdirect.org").unwrap();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].title, "Morning Show");
        assert_eq!(programs[0].icon.as_deref(), Some("http://example.com/icon.png"));
    }

    #[test]
    fn current_program_scans_for_containing_window() {
        let guide = parse_xmltv(SAMPLE, &chrono_tz::UTC);
        let start = guide.programs["I137.json.schedulesdirect.org"][0].start;
        let found = guide.current_program("I137.json.schedulesdirect.org", start + 60);
        assert!(found.is_some());
        assert_eq!(found.unwrap().title, "Morning Show");
    }

    #[test]
    fn parse_offset_handles_positive_and_negative() {
        assert_eq!(parse_offset("+0000"), Some(0));
        assert_eq!(parse_offset("-0500"), Some(-18000));
        assert_eq!(parse_offset("+0530"), Some(19800));
    }
}
