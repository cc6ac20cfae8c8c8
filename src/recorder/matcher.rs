//! Compares stored click fingerprints against freshly captured ones.
//! Every check is advisory: absent fields disable their axis, and decode
//! failures pass rather than block playback.

use image::imageops::FilterType;

use super::types::{ElementProperties, Snapshot};

/// Maximum summed per-channel color difference that still counts as the
/// same element (out of 765).
pub const COLOR_TOLERANCE: u32 = 150;

/// Minimum character-overlap similarity for texts with no substring
/// relation.
pub const TEXT_SIMILARITY_MIN: f64 = 0.5;

/// Default grayscale region similarity threshold.
pub const REGION_SIMILARITY_MIN: f64 = 0.75;

/// Parse a `#rrggbb` triple.
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let digits = value.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Summed absolute per-channel difference, `None` when either side does
/// not parse.
pub fn color_distance(a: &str, b: &str) -> Option<u32> {
    let a = parse_hex_color(a)?;
    let b = parse_hex_color(b)?;
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(&x, &y)| u32::from(x.abs_diff(y)))
            .sum(),
    )
}

/// Case-insensitive text comparison: substring in either direction, or
/// character overlap of at least [`TEXT_SIMILARITY_MIN`].
pub fn text_matches(stored: &str, observed: &str) -> bool {
    let stored = stored.to_lowercase();
    let observed = observed.to_lowercase();
    if stored.contains(&observed) || observed.contains(&stored) {
        return true;
    }
    let total = stored.chars().count().max(1);
    let common = stored.chars().filter(|&c| observed.contains(c)).count();
    common as f64 / total as f64 >= TEXT_SIMILARITY_MIN
}

/// Run the text and color checks, returning one human-readable entry per
/// mismatch. An empty result means "no objection", not "verified".
pub fn verify_properties(stored: &ElementProperties, observed: &ElementProperties) -> Vec<String> {
    let mut mismatches = Vec::new();

    if let (Some(expected), Some(found)) = (stored.text.as_deref(), observed.text.as_deref()) {
        if !expected.is_empty() && !found.is_empty() && !text_matches(expected, found) {
            mismatches.push(format!("text: expected '{expected}', found '{found}'"));
        }
    }

    if let (Some(expected), Some(found)) = (stored.color.as_deref(), observed.color.as_deref()) {
        if let Some(distance) = color_distance(expected, found) {
            if distance > COLOR_TOLERANCE {
                mismatches.push(format!("color: expected {expected}, found {found}"));
            }
        }
    }

    mismatches
}

/// Grayscale similarity of two PNG regions in `[0, 1]`. The observed
/// image is resized to the stored dimensions first. `None` when either
/// image fails to decode.
pub fn region_similarity(stored_png: &[u8], observed_png: &[u8]) -> Option<f64> {
    let stored = image::load_from_memory(stored_png).ok()?;
    let mut observed = image::load_from_memory(observed_png).ok()?;

    if observed.width() != stored.width() || observed.height() != stored.height() {
        observed = observed.resize_exact(stored.width(), stored.height(), FilterType::Triangle);
    }

    let stored = stored.to_luma8();
    let observed = observed.to_luma8();

    let pixel_count = stored.as_raw().len();
    if pixel_count == 0 {
        return None;
    }

    let total_diff: u64 = stored
        .as_raw()
        .iter()
        .zip(observed.as_raw().iter())
        .map(|(&a, &b)| u64::from(a.abs_diff(b)))
        .sum();

    Some(1.0 - total_diff as f64 / (255.0 * pixel_count as f64))
}

/// Similarity of a stored snapshot against a fresh capture. `None`
/// (missing or undecodable input) must be treated as a pass by callers.
pub fn snapshot_similarity(stored: &Snapshot, observed: Option<&[u8]>) -> Option<f64> {
    let stored_png = stored.decode()?;
    let observed_png = observed?;
    region_similarity(&stored_png, observed_png)
}

/// Pixel dimensions of a stored snapshot, for capturing a comparable
/// region at replay time.
pub fn snapshot_dimensions(stored: &Snapshot) -> Option<(u32, u32)> {
    let png = stored.decode()?;
    let image = image::load_from_memory(&png).ok()?;
    Some((image.width(), image.height()))
}
