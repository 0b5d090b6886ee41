//! Display helpers shared by the page agent, overlay and coordinator

use crate::host::{MediaElement, MediaKind, TabDescriptor};

/// Placeholder shown for unknown or non-finite times
pub const UNKNOWN_TIME: &str = "--:--";

/// Longest media label reported by a page
pub const MEDIA_NAME_MAX_CHARS: usize = 60;

/// `m:ss` below an hour, `h:mm:ss` above; non-finite values give `--:--`
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() {
        return UNKNOWN_TIME.to_string();
    }
    let total = seconds.max(0.0).floor() as u64;
    let s = total % 60;
    let m = (total / 60) % 60;
    let h = total / 3600;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Progress percentage; zero when the duration is unknown or zero
pub fn percent(current: f64, duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 && current.is_finite() {
        current / duration * 100.0
    } else {
        0.0
    }
}

/// Truncate to at most `max` characters (not bytes)
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Human label for a media element
pub fn media_name(media: &dyn MediaElement) -> String {
    if let Some(label) = media.label().filter(|l| !l.trim().is_empty()) {
        return truncate_chars(&label, MEDIA_NAME_MAX_CHARS);
    }
    match media.kind() {
        MediaKind::Video => {
            let (w, h) = media.intrinsic_size();
            format!("Video {}x{}", w as u32, h as u32)
        }
        MediaKind::Audio => "Audio".to_string(),
    }
}

/// Overlay title for a tab: its title, else its URL
pub fn tab_title(tab: &TabDescriptor, max_chars: usize) -> String {
    let source = if tab.title.is_empty() { &tab.url } else { &tab.title };
    truncate_chars(source, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(65.9), "1:05");
        assert_eq!(format_time(3599.0), "59:59");
        assert_eq!(format_time(3661.0), "1:01:01");
        assert_eq!(format_time(f64::INFINITY), "--:--");
        assert_eq!(format_time(f64::NAN), "--:--");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(25.0, 100.0), 25.0);
        assert_eq!(percent(10.0, f64::INFINITY), 0.0);
        assert_eq!(percent(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_truncate_is_char_based() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("ab", 80), "ab");
    }

    #[test]
    fn test_tab_title_falls_back_to_url() {
        let tab = TabDescriptor::new(1, "", "https://example.com/watch");
        assert_eq!(tab_title(&tab, 80), "https://example.com/watch");
        let tab = TabDescriptor::new(1, "A very long title", "https://example.com/");
        assert_eq!(tab_title(&tab, 6), "A very");
    }
}
