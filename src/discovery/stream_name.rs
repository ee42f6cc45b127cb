//! Stream name derivation (§4.B "Stream name mapping").

use once_cell::sync::Lazy;
use regex::Regex;

static TERMINAL_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").unwrap());

/// Derive a deterministic stream name for a device path.
///
/// `/dev/videoN` maps to `cameraN`. Nonstandard paths fall back to any
/// terminal digit run, then to a hash of the path mod 1000 rendered as
/// `camera_NNN`. Pure function: same input always yields the same output.
pub fn stream_name_for(device_path: &str) -> String {
    if let Some(n) = device_path.strip_prefix("/dev/video") {
        if let Ok(index) = n.parse::<u32>() {
            return format!("camera{index}");
        }
    }

    if let Some(caps) = TERMINAL_DIGITS.captures(device_path) {
        if let Ok(index) = caps[1].parse::<u32>() {
            return format!("camera{index}");
        }
    }

    let hash = fnv1a(device_path) % 1000;
    format!("camera_{hash:03}")
}

fn fnv1a(input: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in input.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_path_maps_to_cameraN() {
        assert_eq!(stream_name_for("/dev/video0"), "camera0");
        assert_eq!(stream_name_for("/dev/video12"), "camera12");
    }

    #[test]
    fn derivation_is_a_pure_function() {
        assert_eq!(stream_name_for("/dev/video3"), stream_name_for("/dev/video3"));
    }

    #[test]
    fn nonstandard_path_falls_back_to_terminal_digits() {
        assert_eq!(stream_name_for("/dev/custom-cam-7"), "camera7");
    }

    #[test]
    fn path_without_digits_falls_back_to_hash() {
        let name = stream_name_for("/dev/weirdcam");
        assert!(name.starts_with("camera_"));
        assert_eq!(name, stream_name_for("/dev/weirdcam"));
    }
}
