//! Layered regex parsing strategies for introspection-tool output (§4.A).
//!
//! Grounded in `original_source/.../hybrid_monitor.py`'s
//! `_probe_device_info_robust`/`_extract_*_from_output` family. Python's
//! patterns lean on `(?<!-)` lookbehind to reject negative numbers; the
//! `regex` crate has no lookbehind support, so the guard is reimplemented
//! here by checking the byte preceding each match.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::PixelFormatInfo;

fn first_capture(patterns: &[&Regex], text: &str) -> Option<String> {
    for re in patterns {
        if let Some(caps) = re.captures(text) {
            if let Some(m) = caps.get(1) {
                let value = m.as_str().trim().to_string();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*Card type\s*:\s*(.+)$").unwrap(),
        Regex::new(r"(?m)^\s*Device name\s*:\s*(.+)$").unwrap(),
        Regex::new(r"(?m)^\s*Card\s*:\s*(.+)$").unwrap(),
    ]
});

static DRIVER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*Driver name\s*:\s*(.+)$").unwrap(),
        Regex::new(r"(?m)^\s*Driver\s*:\s*(.+)$").unwrap(),
    ]
});

/// Extract device name and driver, first matching pattern wins per field (§4.A).
pub fn extract_device_info(output: &str) -> (Option<String>, Option<String>) {
    let name_refs: Vec<&Regex> = NAME_PATTERNS.iter().collect();
    let driver_refs: Vec<&Regex> = DRIVER_PATTERNS.iter().collect();
    (
        first_capture(&name_refs, output),
        first_capture(&driver_refs, output),
    )
}

static FORMAT_INDEXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+\]:\s*'([A-Za-z0-9_]{2,4})'\s*(?:\(([^)]+)\))?").unwrap());
static FORMAT_PIXEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Pixel Format:\s*'([A-Za-z0-9_]{2,4})'\s*(?:\(([^)]+)\))?").unwrap());

fn known_format_description(code: &str) -> Option<&'static str> {
    match code {
        "YUYV" => Some("YUYV 4:2:2"),
        "MJPG" => Some("Motion-JPEG"),
        "RGB24" => Some("24-bit RGB"),
        "BGR24" => Some("24-bit BGR"),
        "NV12" => Some("Y/UV 4:2:0"),
        "NV21" => Some("Y/VU 4:2:0"),
        "YV12" => Some("Planar YVU 4:2:0"),
        "YU12" => Some("Planar YUV 4:2:0"),
        _ => None,
    }
}

/// Extract pixel formats from `v4l2-ctl --list-formats-ext`-style output.
pub fn extract_formats(output: &str) -> Vec<PixelFormatInfo> {
    let mut seen = HashMap::new();
    for re in [&*FORMAT_INDEXED, &*FORMAT_PIXEL] {
        for caps in re.captures_iter(output) {
            let code = caps.get(1).unwrap().as_str().to_string();
            let description = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|d| !d.is_empty())
                .or_else(|| known_format_description(&code).map(str::to_string));
            seen.entry(code.clone()).or_insert(PixelFormatInfo {
                code,
                description,
            });
        }
    }
    let mut formats: Vec<_> = seen.into_values().collect();
    formats.sort();
    formats
}

static RESOLUTION_DISCRETE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Size:\s*Discrete\s+(\d+)x(\d+)").unwrap());
static RESOLUTION_FALLBACK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{3,4})x(\d{3,4})\b").unwrap());

fn valid_resolution(w: u32, h: u32) -> bool {
    (160..=4096).contains(&w) && (120..=3072).contains(&h)
}

/// Extract resolutions, validated and sorted descending by pixel area (§4.A, §8).
pub fn extract_resolutions(output: &str) -> Vec<String> {
    let mut found: Vec<(u32, u32)> = Vec::new();
    for caps in RESOLUTION_DISCRETE.captures_iter(output) {
        if let (Ok(w), Ok(h)) = (caps[1].parse(), caps[2].parse()) {
            if valid_resolution(w, h) && !found.contains(&(w, h)) {
                found.push((w, h));
            }
        }
    }
    if found.is_empty() {
        for caps in RESOLUTION_FALLBACK.captures_iter(output) {
            if let (Ok(w), Ok(h)) = (caps[1].parse(), caps[2].parse()) {
                if valid_resolution(w, h) && !found.contains(&(w, h)) {
                    found.push((w, h));
                }
            }
        }
    }
    found.sort_by(|a, b| (b.0 * b.1).cmp(&(a.0 * a.1)).then(b.0.cmp(&a.0)));
    found.into_iter().map(|(w, h)| format!("{w}x{h}")).collect()
}

struct RatePattern {
    regex: Regex,
}

static FRAME_RATE_PATTERNS: Lazy<Vec<RatePattern>> = Lazy::new(|| {
    let raw = [
        r"(\d+(?:\.\d+)?)\s*fps",
        r"(\d+(?:\.\d+)?)\s*FPS",
        r"Frame\s*rate[:\s]+(\d+(?:\.\d+)?)",
        r"(\d+(?:\.\d+)?)\s*Hz",
        r"@(\d+(?:\.\d+)?)",
        r"Interval:\s*\[1/(\d+(?:\.\d+)?)\]",
        r"\[1/(\d+(?:\.\d+)?)\]",
        r"1/(\d+(?:\.\d+)?)\s*s",
        r"(\d+(?:\.\d+)?)\s*frame[s]?\s*per\s*second",
        r"rate:\s*(\d+(?:\.\d+)?)",
        r"fps:\s*(\d+(?:\.\d+)?)",
    ];
    raw.iter()
        .map(|p| RatePattern {
            regex: Regex::new(p).unwrap(),
        })
        .collect()
});

/// Negative-number guard: Python's patterns use `(?<!-)`, which `regex` cannot
/// express. Reject a match whose immediately preceding byte is `-`.
fn preceded_by_minus(text: &str, match_start: usize) -> bool {
    text.as_bytes()
        .get(match_start.wrapping_sub(1))
        .map(|b| *b == b'-')
        .unwrap_or(false)
}

/// Extract raw candidate frame-rate values from one invocation's output,
/// accumulating detection frequency in `frequency`.
pub fn extract_frame_rate_candidates(output: &str, frequency: &mut HashMap<String, u32>) {
    for pattern in FRAME_RATE_PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(output) {
            let m = caps.get(1).unwrap();
            if preceded_by_minus(output, m.start()) {
                continue;
            }
            let Ok(value) = m.as_str().parse::<f64>() else {
                continue;
            };
            if !(1.0..=300.0).contains(&value) {
                continue;
            }
            let normalized = normalize_rate(value);
            *frequency.entry(normalized).or_insert(0) += 1;
        }
    }
}

/// Format a rate value the way §4.A requires: integers stay integral,
/// fractional values are rendered to one decimal place.
pub fn normalize_rate(value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn rate_priority(value: f64) -> u8 {
    let rounded = value.round() as i64;
    if [30, 25, 24].contains(&rounded) {
        0
    } else if [15, 60, 10].contains(&rounded) {
        1
    } else {
        2
    }
}

/// Order accumulated frame-rate candidates by the three-key tuple
/// `(priority, -frequency, -value)` from §4.A.
pub fn select_frame_rates(frequency: &HashMap<String, u32>) -> Vec<String> {
    let mut entries: Vec<(String, f64, u32)> = frequency
        .iter()
        .filter_map(|(rate, count)| rate.parse::<f64>().ok().map(|v| (rate.clone(), v, *count)))
        .collect();

    entries.sort_by(|a, b| {
        let pa = rate_priority(a.1);
        let pb = rate_priority(b.1);
        pa.cmp(&pb)
            .then(b.2.cmp(&a.2))
            .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
    });

    entries.into_iter().map(|(rate, _, _)| rate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_and_driver_first_match_wins() {
        let text = "Driver name   : uvcvideo\nCard type     : USB Camera\n";
        let (name, driver) = extract_device_info(text);
        assert_eq!(name.as_deref(), Some("USB Camera"));
        assert_eq!(driver.as_deref(), Some("uvcvideo"));
    }

    #[test]
    fn extracts_formats_with_descriptions() {
        let text = "[0]: 'YUYV' (YUYV 4:2:2)\n[1]: 'MJPG'\n";
        let formats = extract_formats(text);
        assert_eq!(formats.len(), 2);
        assert!(formats.iter().any(|f| f.code == "YUYV" && f.description.as_deref() == Some("YUYV 4:2:2")));
        assert!(formats.iter().any(|f| f.code == "MJPG" && f.description.as_deref() == Some("Motion-JPEG")));
    }

    #[test]
    fn extracts_and_bounds_resolutions() {
        let text = "Size: Discrete 1920x1080\nSize: Discrete 100x100\nSize: Discrete 1280x720\n";
        let resolutions = extract_resolutions(text);
        assert_eq!(resolutions, vec!["1920x1080", "1280x720"]);
    }

    #[test]
    fn rejects_negative_rate_matches() {
        let mut freq = HashMap::new();
        extract_frame_rate_candidates("offset: -30 fps adjustment, true rate 25 fps", &mut freq);
        assert!(!freq.contains_key("30"));
        assert!(freq.contains_key("25"));
    }

    #[test]
    fn selects_rates_by_priority_then_frequency_then_value() {
        let mut freq = HashMap::new();
        freq.insert("30".to_string(), 2);
        freq.insert("60".to_string(), 3);
        freq.insert("7".to_string(), 1);
        let ordered = select_frame_rates(&freq);
        assert_eq!(ordered, vec!["30", "60", "7"]);
    }

    #[test]
    fn normalizes_integer_and_fractional_rates() {
        assert_eq!(normalize_rate(30.0), "30");
        assert_eq!(normalize_rate(29.97), "30.0");
    }
}
