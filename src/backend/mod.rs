//! Capability contracts for the external services the engine drives:
//! display/capture, OCR, synthetic input, and the pointer-press wait used
//! while recording. The core only sees these traits; concrete
//! implementations live in [`desktop`] and [`ocr`].

pub mod desktop;
pub mod ocr;

use thiserror::Error;

use crate::recorder::types::ScrollDirection;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid region x={x} y={y} w={width} h={height}")]
    InvalidRegion {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("no monitor found")]
    NoMonitor,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr engine not available: {0}")]
    NotAvailable(String),
    #[error("recognition failed: {0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("input dispatch failed: {0}")]
    Input(String),
    #[error("window focus failed: {0}")]
    Focus(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
}

/// Identifier of an on-screen window, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle(pub String);

/// Display geometry and pixel access.
pub trait ScreenBackend {
    /// Current display size, `None` when it cannot be queried.
    fn size(&self) -> Option<(u32, u32)>;

    /// Current pointer position, `None` when it cannot be queried.
    fn pointer(&self) -> Option<(i32, i32)>;

    /// Capture a screen region as PNG bytes. The origin is the top-left
    /// corner of the region, not its center.
    fn capture_region(
        &self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, CaptureError>;
}

/// Text recognition over a captured region.
pub trait OcrBackend {
    /// Recognize a single line of text in a PNG image.
    fn recognize_line(&self, png: &[u8]) -> Result<String, OcrError>;
}

/// Synthetic input dispatch. Fire-and-forget: the core consumes nothing
/// beyond success or failure.
pub trait InputBackend {
    fn open_url(&mut self, url: &str) -> Result<(), DispatchError>;

    /// Handle of the currently focused window, if it can be determined.
    fn active_window(&mut self) -> Option<WindowHandle>;

    fn focus_window(&mut self, window: &WindowHandle) -> Result<(), DispatchError>;

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<(), DispatchError>;

    fn click(&mut self) -> Result<(), DispatchError>;

    fn type_text(&mut self, text: &str) -> Result<(), DispatchError>;

    /// Dispatch a key name or `modifier+key` chord, e.g. `Return` or `ctrl+a`.
    fn send_key(&mut self, chord: &str) -> Result<(), DispatchError>;

    /// One discrete wheel notch in the given direction.
    fn scroll_pulse(&mut self, direction: ScrollDirection) -> Result<(), DispatchError>;
}

/// Blocking wait for the next pointer press, used while recording a click
/// step. Implementations must unblock and return `None` when the callback
/// produced by [`PressWait::abort_fn`] is invoked.
pub trait PressWait {
    fn wait_for_press(&mut self) -> Option<(i32, i32)>;

    /// Callback that aborts a pending `wait_for_press` from another thread.
    fn abort_fn(&self) -> Box<dyn Fn() + Send + Sync>;
}
