//! Small parsers for the two places the upstream protocol hides structured
//! data inside opaque strings: a live-viewing session `Name` (source
//! descriptor) and a VOD session `Name` (file id + identifier), plus the
//! `activities.set` `Value` line itself.
//!
//! Both deserve fuzzing against a corpus of real `Name` strings rather than
//! growing ad hoc inside the detectors that consume them — this module is
//! that parser, independent of detector state so it can be unit-tested in
//! isolation.

use once_cell::sync::Lazy;
use regex::Regex;

/// Live-viewing activity line: `Watching ch7 ABC from LivingRoom
/// (192.168.1.10) 1080i`. Resolution and IP are optional; device is
/// required for the Stream Tracker / tracking-key derivation to work at all.
static WATCHING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ch(\d+)\D*from\s+([^(]+?)\s*(?:\(([^)]+)\))?\s*(\S+)?$").unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelActivity {
    pub channel_number: String,
    pub device: String,
    pub ip: Option<String>,
    pub resolution: Option<String>,
}

/// Parses a `Watching chN ... from DEVICE (IP) RES` activity string.
/// Returns `None` if no channel number / device pair can be found, i.e. the
/// `Value` does not actually describe a live-viewing session.
pub fn parse_channel_activity(value: &str) -> Option<ChannelActivity> {
    let caps = WATCHING_RE.captures(value)?;
    let channel_number = caps.get(1)?.as_str().to_string();
    let device = caps.get(2)?.as_str().trim().to_string();
    if device.is_empty() {
        return None;
    }
    let ip = caps.get(3).map(|m| m.as_str().trim().to_string());
    let resolution = caps.get(4).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty());
    Some(ChannelActivity {
        channel_number,
        device,
        ip,
        resolution,
    })
}

/// Derives the source descriptor from a session `Name` of the
/// form `<n>-stream-<TYPE>-<DETAIL>...`. `TYPE` is `M3U`/`TVE` (case
/// insensitive) or a hex tuner id; `DETAIL` is the human-readable bit we
/// actually want to show ("Primary", "Basement", ...). Falls back to the
/// raw type segment when there's nothing else to show.
pub fn parse_source_descriptor(session_name: &str) -> Option<String> {
    let (_, after) = session_name.split_once("-stream-")?;
    let segments: Vec<&str> = after.split('-').filter(|s| !s.is_empty()).collect();
    let head = *segments.first()?;

    if head.eq_ignore_ascii_case("m3u") || head.eq_ignore_ascii_case("tve") {
        match segments.len() {
            0 | 1 => Some(head.to_string()),
            2 => Some(segments[1].to_string()),
            // Trailing segment is assumed to be a random session suffix, not
            // part of the human-readable detail.
            n => Some(segments[1..n - 1].join("-")),
        }
    } else {
        // Hex tuner id or an unrecognized scheme: surface it verbatim.
        Some(head.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodNameParts {
    pub file_id: String,
    pub identifier: String,
}

/// Parses the historical VOD `Name` variants (`6-file-*`, `7-file*`,
/// `7-*file*`): each encodes a file id and a session identifier (often the
/// viewer's IP) in a slightly different layout, so this tries each in turn
/// rather than committing to one regex.
pub fn parse_vod_name(name: &str) -> Option<VodNameParts> {
    static VARIANT_6: Lazy<Regex> = Lazy::new(|| Regex::new(r"^6-file-(?P<id>[^-]+)-(?P<ident>.+)$").unwrap());
    static VARIANT_7_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^7-file(?P<id>[^-]+)-(?P<ident>.+)$").unwrap());
    static VARIANT_7_WRAPPED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^7-(?P<ident>[^-]*)file(?P<id>[^-]+)(?:-.*)?$").unwrap());

    for re in [&*VARIANT_6, &*VARIANT_7_FILE, &*VARIANT_7_WRAPPED] {
        if let Some(caps) = re.captures(name) {
            let file_id = caps.name("id")?.as_str().to_string();
            let ident_raw = caps.name("ident")?.as_str();
            let identifier = if ident_raw.is_empty() {
                file_id.clone()
            } else {
                ident_raw.trim_matches('-').to_string()
            };
            if !file_id.is_empty() {
                return Some(VodNameParts { file_id, identifier });
            }
        }
    }
    None
}

/// `sessionKey = vod<fileId>-<sessionIdentifier>` per §3.
pub fn vod_session_key(file_id: &str, identifier: &str) -> String {
    format!("vod{file_id}-{identifier}")
}

/// Parses a VOD progress timestamp like `1h15m42s`, `15m42s`, or `0s` into
/// seconds. Any component may be absent; an unparseable string yields `None`
/// rather than a default, since "unknown" and "zero" mean different things
/// to the significant-threshold comparison.
pub fn parse_hms(s: &str) -> Option<u64> {
    static HMS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").unwrap());
    let caps = HMS_RE.captures(s.trim())?;
    if caps.get(1).is_none() && caps.get(2).is_none() && caps.get(3).is_none() {
        return None;
    }
    let h: u64 = caps.get(1).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    let m: u64 = caps.get(2).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    let s: u64 = caps.get(3).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    Some(h * 3600 + m * 60 + s)
}

/// Parses the `Value` field of a VOD `activities.set` event once it carries
/// a ` at <timestamp>` suffix: `Watching <title> from DEVICE (IP) at 1h2m3s`.
/// Device and IP are optional — many upstream variants omit one or both.
pub fn parse_vod_value(value: &str) -> Option<VodValueParts> {
    static VOD_VALUE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)(?:from\s+([^(]+?)\s*(?:\(([^)]+)\))?\s*)?at\s+(\S+)\s*$").unwrap());
    let caps = VOD_VALUE_RE.captures(value)?;
    let timestamp = caps.get(3)?.as_str().to_string();
    Some(VodValueParts {
        device: caps.get(1).map(|m| m.as_str().trim().to_string()),
        ip: caps.get(2).map(|m| m.as_str().trim().to_string()),
        timestamp,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodValueParts {
    pub device: Option<String>,
    pub ip: Option<String>,
    pub timestamp: String,
}

/// Classification of a non-empty VOD `Value` (the empty-Value end case is
/// handled by the caller directly, since it carries no `Name` parse needs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VodValue {
    /// `Streaming` with no ` at <timestamp>` suffix yet: a session exists
    /// but playback position isn't known. No notification should fire.
    Placeholder,
    Progress(VodValueParts),
}

/// Classifies a VOD `Value` per §4.7: a ` at ` suffix means a parseable
/// progress update; bare `Streaming` with no suffix is a placeholder;
/// anything else isn't a VOD activity line at all.
pub fn classify_vod_value(value: &str) -> Option<VodValue> {
    if value.to_lowercase().contains(" at ") {
        return parse_vod_value(value).map(VodValue::Progress);
    }
    if value.to_lowercase().contains("streaming") {
        return Some(VodValue::Placeholder);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_watching_line() {
        let a = parse_channel_activity("Watching ch7 ABC from LivingRoom (192.168.1.10) 1080i").unwrap();
        assert_eq!(a.channel_number, "7");
        assert_eq!(a.device, "LivingRoom");
        assert_eq!(a.ip.as_deref(), Some("192.168.1.10"));
        assert_eq!(a.resolution.as_deref(), Some("1080i"));
    }

    #[test]
    fn parses_line_without_resolution() {
        let a = parse_channel_activity("Watching ch9 NBC from LivingRoom (192.168.1.10)").unwrap();
        assert_eq!(a.channel_number, "9");
        assert_eq!(a.resolution, None);
    }

    #[test]
    fn empty_value_parses_to_none() {
        assert!(parse_channel_activity("").is_none());
    }

    #[test]
    fn source_descriptor_m3u_primary() {
        let s = parse_source_descriptor("6-stream-M3U-Primary-abc123").unwrap();
        assert_eq!(s, "Primary");
    }

    #[test]
    fn source_descriptor_tve() {
        let s = parse_source_descriptor("6-stream-TVE-Basement-xyz").unwrap();
        assert_eq!(s, "Basement");
    }

    #[test]
    fn source_descriptor_hex_tuner_id() {
        let s = parse_source_descriptor("6-stream-a1b2c3d4").unwrap();
        assert_eq!(s, "a1b2c3d4");
    }

    #[test]
    fn vod_name_variant_6() {
        let p = parse_vod_name("6-file-F1-192.168.1.20").unwrap();
        assert_eq!(p.file_id, "F1");
        assert_eq!(p.identifier, "192.168.1.20");
    }

    #[test]
    fn vod_name_variant_7_file() {
        let p = parse_vod_name("7-fileF2-devicehash").unwrap();
        assert_eq!(p.file_id, "F2");
        assert_eq!(p.identifier, "devicehash");
    }

    #[test]
    fn vod_name_variant_7_wrapped() {
        let p = parse_vod_name("7-devicehashfileF3").unwrap();
        assert_eq!(p.file_id, "F3");
        assert_eq!(p.identifier, "devicehash");
    }

    #[test]
    fn unrecognized_name_returns_none() {
        assert!(parse_vod_name("6-stream-M3U-Primary-abc").is_none());
    }

    #[test]
    fn classify_streaming_without_at_is_placeholder() {
        assert_eq!(classify_vod_value("Streaming from LivingRoom (192.168.1.20)"), Some(VodValue::Placeholder));
    }

    #[test]
    fn classify_watching_with_at_is_progress() {
        let classified = classify_vod_value("Watching Movie from LivingRoom (192.168.1.20) at 1h2m3s").unwrap();
        assert!(matches!(classified, VodValue::Progress(_)));
    }

    #[test]
    fn classify_unrelated_value_is_none() {
        assert!(classify_vod_value("Recording something").is_none());
    }
}
