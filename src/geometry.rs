//! Conversion between absolute pixel coordinates and fractional screen
//! coordinates, so recorded clicks survive a resolution change.

/// Screen size assumed when the display cannot be queried.
pub const DEFAULT_SCREEN: (u32, u32) = (1920, 1080);

fn sanitize(width: u32, height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        DEFAULT_SCREEN
    } else {
        (width, height)
    }
}

/// Substitute the default screen size when the display query failed.
pub fn screen_or_default(size: Option<(u32, u32)>) -> (u32, u32) {
    match size {
        Some((w, h)) => sanitize(w, h),
        None => DEFAULT_SCREEN,
    }
}

/// Convert an absolute pixel position to fractions of the screen size.
pub fn to_fraction(x: i32, y: i32, width: u32, height: u32) -> (f64, f64) {
    let (width, height) = sanitize(width, height);
    (f64::from(x) / f64::from(width), f64::from(y) / f64::from(height))
}

/// Convert fractional coordinates back to absolute pixels, truncating.
pub fn to_absolute(px: f64, py: f64, width: u32, height: u32) -> (i32, i32) {
    let (width, height) = sanitize(width, height);
    ((px * f64::from(width)) as i32, (py * f64::from(height)) as i32)
}
