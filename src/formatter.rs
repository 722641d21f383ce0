//! Alert Formatter: stateless construction of
//! `{title, body, image_url}` from structured fields under the configured
//! display-option flags.

use crate::config::ChannelWatchingOptions;
use crate::model::FormattedAlert;

#[derive(Debug, Default, Clone)]
pub struct ChannelAlertFields {
    pub channel_name: Option<String>,
    pub channel_number: String,
    pub program_title: Option<String>,
    pub resolution: Option<String>,
    pub device: String,
    pub source: Option<String>,
    pub total_streams: Option<u64>,
    pub ip: Option<String>,
    pub channel_image: Option<String>,
    pub program_image: Option<String>,
}

/// Builds the ordered, newline-joined alert body: each field
/// block is gated by its own display-option flag, in the same fixed order.
pub fn format_channel_alert(fields: &ChannelAlertFields, options: &ChannelWatchingOptions) -> FormattedAlert {
    let mut lines = Vec::new();

    if options.show_channel {
        if let Some(name) = &fields.channel_name {
            lines.push(format!("📺 {name}"));
        }
        lines.push(format!("Channel: {}", fields.channel_number));
        if options.show_program {
            if let Some(title) = &fields.program_title {
                lines.push(format!("Program: {title}"));
            }
        }
    }
    if options.show_resolution {
        if let Some(res) = &fields.resolution {
            lines.push(format!("Resolution: {res}"));
        }
    }
    if options.show_device {
        lines.push(format!("Device: {}", fields.device));
    }
    if options.show_source {
        if let Some(source) = &fields.source {
            lines.push(format!("Source: {source}"));
        }
        if let Some(total) = fields.total_streams {
            lines.push(format!("Total Streams: {total}"));
        }
    }
    if options.show_ip {
        if let Some(ip) = &fields.ip {
            lines.push(format!("Device IP: {ip}"));
        }
    }

    let image_url = match options.image_source {
        crate::config::ImagePreference::Channel => fields.channel_image.clone().or_else(|| fields.program_image.clone()),
        crate::config::ImagePreference::Program => fields.program_image.clone().or_else(|| fields.channel_image.clone()),
    };

    FormattedAlert {
        title: "Channels DVR - Watching TV".to_string(),
        body: lines.join("\n"),
        image_url,
    }
}

pub fn format_exit_line(channel_name: &str, channel_number: &str) -> String {
    format!("Exited: {channel_name} (ch{channel_number})")
}

#[derive(Debug, Default, Clone)]
pub struct VodAlertFields {
    pub title: String,
    pub year: Option<u32>,
    pub episode_title: Option<String>,
    pub timestamp: String,
    pub duration_secs: Option<u64>,
    pub device: Option<String>,
    pub ip: Option<String>,
    pub summary: Option<String>,
    pub rating: Option<String>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
    pub image_url: Option<String>,
}

pub fn format_vod_alert(fields: &VodAlertFields) -> FormattedAlert {
    let mut title = fields.title.clone();
    if let Some(year) = fields.year {
        title.push_str(&format!(" ({year})"));
    }

    let mut lines = vec![format!("🎬 {title}")];
    if let Some(ep) = &fields.episode_title {
        lines.push(format!("Episode: {ep}"));
    }
    if let Some(dur) = fields.duration_secs {
        lines.push(format!("Progress: {} / {}m", fields.timestamp, dur / 60));
    } else {
        lines.push(format!("Progress: {}", fields.timestamp));
    }
    if let Some(device) = &fields.device {
        lines.push(format!("Device: {device}"));
    }
    if let Some(ip) = &fields.ip {
        lines.push(format!("Device IP: {ip}"));
    }
    if let Some(summary) = &fields.summary {
        lines.push(summary.clone());
    }
    if fields.rating.is_some() || !fields.genres.is_empty() {
        let rating = fields.rating.clone().unwrap_or_default();
        let genres = fields.genres.join(", ");
        lines.push(format!("{rating} · {genres}").trim_matches([' ', '·']).to_string());
    }
    if !fields.cast.is_empty() {
        let mut cast: Vec<String> = fields.cast.iter().take(3).cloned().collect();
        if fields.cast.len() > 3 {
            cast.push("…".to_string());
        }
        lines.push(format!("Cast: {}", cast.join(", ")));
    }

    FormattedAlert {
        title: "Channels DVR - Watching VOD".to_string(),
        body: lines.join("\n"),
        image_url: fields.image_url.clone(),
    }
}

#[derive(Debug, Clone)]
pub struct RecordingAlertFields {
    pub status_emoji: &'static str,
    pub status_label: String,
    pub job_name: String,
    pub channels: Vec<String>,
    pub time_label: String,
    pub duration_secs: Option<u64>,
}

/// Builds the Recording-Events body: a status line, then time/duration/
/// channel detail lines. Title is always the same constant.
pub fn format_recording_alert(fields: &RecordingAlertFields) -> FormattedAlert {
    let mut lines = vec![format!("{} {}", fields.status_emoji, fields.status_label)];
    lines.push(format!("Program: {}", fields.job_name));
    if !fields.channels.is_empty() {
        lines.push(format!("Channel: {}", fields.channels.join(", ")));
    }
    lines.push(format!("Time: {}", fields.time_label));
    if let Some(duration) = fields.duration_secs {
        lines.push(format!("Duration: {}m", duration / 60));
    }

    FormattedAlert {
        title: "Channels DVR - Recording Event".to_string(),
        body: lines.join("\n"),
        image_url: None,
    }
}

/// Renders a Unix timestamp in `tz` as "Today"/"Tomorrow"/`MMM DD, YYYY` plus
/// a 12-hour clock time and the zone abbreviation.
pub fn format_recording_time(unix_secs: u64, now: u64, tz: &chrono_tz::Tz) -> String {
    use chrono::TimeZone;

    let dt = tz.timestamp_opt(unix_secs as i64, 0).single().unwrap_or_else(|| tz.timestamp_opt(0, 0).unwrap());
    let now_dt = tz.timestamp_opt(now as i64, 0).single().unwrap_or_else(|| tz.timestamp_opt(0, 0).unwrap());

    let day_label = if dt.date_naive() == now_dt.date_naive() {
        "Today".to_string()
    } else if dt.date_naive() == now_dt.date_naive() + chrono::Duration::days(1) {
        "Tomorrow".to_string()
    } else {
        dt.format("%b %d, %Y").to_string()
    };

    format!("{day_label} {}", dt.format("%-I:%M %p %Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> ChannelWatchingOptions {
        ChannelWatchingOptions::default()
    }

    #[test]
    fn scenario_channel_start_body_fields() {
        let fields = ChannelAlertFields {
            channel_name: Some("ABC".to_string()),
            channel_number: "7".to_string(),
            device: "LivingRoom".to_string(),
            ip: Some("192.168.1.10".to_string()),
            source: Some("Primary".to_string()),
            resolution: Some("1080i".to_string()),
            ..Default::default()
        };
        let alert = format_channel_alert(&fields, &all_on());
        assert_eq!(alert.title, "Channels DVR - Watching TV");
        assert!(alert.body.contains("📺 ABC"));
        assert!(alert.body.contains("Channel: 7"));
        assert!(alert.body.contains("Device: LivingRoom"));
        assert!(alert.body.contains("Device IP: 192.168.1.10"));
        assert!(alert.body.contains("Source: Primary"));
    }

    #[test]
    fn disabled_field_is_omitted() {
        let mut options = all_on();
        options.show_ip = false;
        let fields = ChannelAlertFields {
            ip: Some("192.168.1.10".to_string()),
            channel_number: "7".to_string(),
            device: "d".to_string(),
            ..Default::default()
        };
        let alert = format_channel_alert(&fields, &options);
        assert!(!alert.body.contains("Device IP"));
    }

    #[test]
    fn image_preference_falls_back_when_primary_missing() {
        let mut options = all_on();
        options.image_source = crate::config::ImagePreference::Program;
        let fields = ChannelAlertFields {
            channel_number: "7".to_string(),
            device: "d".to_string(),
            channel_image: Some("channel.png".to_string()),
            program_image: None,
            ..Default::default()
        };
        let alert = format_channel_alert(&fields, &options);
        assert_eq!(alert.image_url.as_deref(), Some("channel.png"));
    }

    #[test]
    fn vod_body_truncates_cast_to_three_with_ellipsis() {
        let fields = VodAlertFields {
            title: "Movie".to_string(),
            timestamp: "10m".to_string(),
            cast: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            ..Default::default()
        };
        let alert = format_vod_alert(&fields);
        assert!(alert.body.contains("Cast: A, B, C, …"));
    }

    #[test]
    fn recording_alert_has_constant_title() {
        let fields = RecordingAlertFields {
            status_emoji: "📅",
            status_label: "Scheduled".to_string(),
            job_name: "Batman".to_string(),
            channels: vec!["137".to_string()],
            time_label: "Today 8:00 PM EST".to_string(),
            duration_secs: Some(7200),
        };
        let alert = format_recording_alert(&fields);
        assert_eq!(alert.title, "Channels DVR - Recording Event");
        assert!(alert.body.contains("📅 Scheduled"));
        assert!(alert.body.contains("Channel: 137"));
        assert!(alert.body.contains("Duration: 120m"));
    }

    #[test]
    fn recording_time_label_uses_today_for_same_day() {
        let label = format_recording_time(1_000, 1_000, &chrono_tz::UTC);
        assert!(label.starts_with("Today"));
    }
}
