//! Captures the verification signals for a click target: a small pixel
//! snapshot, an OCR text token, and a dominant color sample. Capture and
//! OCR failures degrade the fingerprint to partial or empty; they are
//! never surfaced as errors.

use tracing::debug;

use crate::backend::{OcrBackend, ScreenBackend};

use super::types::{ElementProperties, Snapshot};

/// Edge length of the square snapshot around a click.
pub const SNAPSHOT_SIZE: u32 = 60;

/// Wider region used for text and color analysis.
pub const PROPERTY_REGION: (u32, u32) = (120, 60);

/// Color is averaged over this many pixels per axis around the center.
const COLOR_KERNEL: i32 = 7;

/// Signals captured for one click target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fingerprint {
    pub snapshot: Option<Snapshot>,
    pub properties: ElementProperties,
}

pub struct Fingerprinter<'a> {
    screen: &'a dyn ScreenBackend,
    ocr: &'a dyn OcrBackend,
}

impl<'a> Fingerprinter<'a> {
    pub fn new(screen: &'a dyn ScreenBackend, ocr: &'a dyn OcrBackend) -> Self {
        Self { screen, ocr }
    }

    /// Capture everything available around `(x, y)`. A single failed
    /// attempt leaves the corresponding field absent; there is no retry.
    pub fn capture(&self, x: i32, y: i32) -> Fingerprint {
        Fingerprint {
            snapshot: self
                .capture_centered(x, y, SNAPSHOT_SIZE, SNAPSHOT_SIZE)
                .map(|png| Snapshot::from_png(&png)),
            properties: self.capture_properties(x, y),
        }
    }

    /// Text and color signals from the wider property region.
    pub fn capture_properties(&self, x: i32, y: i32) -> ElementProperties {
        let (width, height) = PROPERTY_REGION;
        let Some(png) = self.capture_centered(x, y, width, height) else {
            return ElementProperties::default();
        };

        let text = match self.ocr.recognize_line(&png) {
            Ok(raw) => scrub_text(&raw),
            Err(error) => {
                debug!(%error, "ocr unavailable, skipping text signal");
                None
            }
        };

        ElementProperties {
            text,
            color: dominant_color(&png),
        }
    }

    /// Capture a region centered on the point, clamping the origin to the
    /// screen edge like the snapshot taken at record time.
    pub fn capture_centered(&self, x: i32, y: i32, width: u32, height: u32) -> Option<Vec<u8>> {
        let left = (x - width as i32 / 2).max(0);
        let top = (y - height as i32 / 2).max(0);
        match self.screen.capture_region(left, top, width, height) {
            Ok(png) => Some(png),
            Err(error) => {
                debug!(%error, "region capture failed, field absent");
                None
            }
        }
    }
}

/// Strip OCR noise: keep alphanumeric and whitespace, trim, and discard
/// results shorter than two characters.
fn scrub_text(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().count() >= 2 {
        Some(cleaned.to_string())
    } else {
        None
    }
}

/// Average a small neighborhood at the image center, per channel, as a
/// `#rrggbb` triple.
fn dominant_color(png: &[u8]) -> Option<String> {
    let image = image::load_from_memory(png).ok()?.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return None;
    }

    let cx = image.width() as i32 / 2;
    let cy = image.height() as i32 / 2;
    let radius = COLOR_KERNEL / 2;

    let mut sums = [0_u64; 3];
    let mut count = 0_u64;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let px = (cx + dx).clamp(0, image.width() as i32 - 1) as u32;
            let py = (cy + dy).clamp(0, image.height() as i32 - 1) as u32;
            let pixel = image.get_pixel(px, py);
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += u64::from(channel);
            }
            count += 1;
        }
    }

    let [r, g, b] = sums.map(|sum| (sum / count) as u8);
    Some(format!("#{r:02x}{g:02x}{b:02x}"))
}
