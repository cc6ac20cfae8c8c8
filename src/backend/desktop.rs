//! Desktop implementations of the capability traits: `screenshots` for
//! display geometry and region capture, `enigo` for synthetic input,
//! `xdotool` for window focus, and `xinput` for the record-time press
//! wait.

use std::io::{BufRead, BufReader, Cursor};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use screenshots::image::ImageOutputFormat;
use screenshots::Screen;
use tracing::warn;

use crate::recorder::types::ScrollDirection;

use super::{CaptureError, DispatchError, InputBackend, PressWait, ScreenBackend, WindowHandle};

/// Wheel lines dispatched per scroll pulse; one pulse matches one notch
/// of a conventional mouse wheel.
const SCROLL_LINES_PER_PULSE: i32 = 3;

/// Pause between seeing a press event and sampling the pointer, so the
/// position settles on the pressed location.
const PRESS_SAMPLE_DELAY: Duration = Duration::from_millis(50);

pub struct DesktopBackend {
    enigo: Enigo,
}

impl DesktopBackend {
    pub fn new() -> Result<Self, DispatchError> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|error| DispatchError::Input(error.to_string()))?;
        Ok(Self { enigo })
    }
}

fn primary_screen() -> Result<Screen, CaptureError> {
    let screens = Screen::all().map_err(|error| CaptureError::Failed(error.to_string()))?;
    screens
        .into_iter()
        .reduce(|primary, candidate| {
            if candidate.display_info.is_primary {
                candidate
            } else {
                primary
            }
        })
        .ok_or(CaptureError::NoMonitor)
}

impl ScreenBackend for DesktopBackend {
    fn size(&self) -> Option<(u32, u32)> {
        let screen = primary_screen().ok()?;
        Some((screen.display_info.width, screen.display_info.height))
    }

    fn pointer(&self) -> Option<(i32, i32)> {
        self.enigo.location().ok()
    }

    fn capture_region(
        &self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidRegion {
                x,
                y,
                width,
                height,
            });
        }
        let screen = primary_screen()?;
        let image = screen
            .capture_area(x, y, width, height)
            .map_err(|error| CaptureError::Failed(error.to_string()))?;

        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageOutputFormat::Png)
            .map_err(|error| CaptureError::Encoding(error.to_string()))?;
        Ok(buffer.into_inner())
    }
}

impl InputBackend for DesktopBackend {
    fn open_url(&mut self, url: &str) -> Result<(), DispatchError> {
        let launcher = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        Command::new(launcher)
            .arg(url)
            .spawn()
            .map_err(|error| DispatchError::Launch(format!("{launcher}: {error}")))?;
        Ok(())
    }

    fn active_window(&mut self) -> Option<WindowHandle> {
        let output = Command::new("xdotool").arg("getactivewindow").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            None
        } else {
            Some(WindowHandle(id))
        }
    }

    fn focus_window(&mut self, window: &WindowHandle) -> Result<(), DispatchError> {
        let output = Command::new("xdotool")
            .args(["windowactivate", "--sync", &window.0])
            .output()
            .map_err(|error| DispatchError::Focus(error.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DispatchError::Focus(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<(), DispatchError> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|error| DispatchError::Input(error.to_string()))
    }

    fn click(&mut self) -> Result<(), DispatchError> {
        self.enigo
            .button(Button::Left, Direction::Click)
            .map_err(|error| DispatchError::Input(error.to_string()))
    }

    fn type_text(&mut self, text: &str) -> Result<(), DispatchError> {
        self.enigo
            .text(text)
            .map_err(|error| DispatchError::Input(error.to_string()))
    }

    fn send_key(&mut self, chord: &str) -> Result<(), DispatchError> {
        let parts: Vec<&str> = chord
            .split('+')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        let Some((&last, modifiers)) = parts.split_last() else {
            return Err(DispatchError::Input(format!("empty key chord '{chord}'")));
        };

        for modifier in modifiers {
            let key = parse_key(modifier)?;
            self.enigo
                .key(key, Direction::Press)
                .map_err(|error| DispatchError::Input(error.to_string()))?;
        }

        let result = self
            .enigo
            .key(parse_key(last)?, Direction::Click)
            .map_err(|error| DispatchError::Input(error.to_string()));

        for modifier in modifiers.iter().rev() {
            let key = parse_key(modifier)?;
            self.enigo
                .key(key, Direction::Release)
                .map_err(|error| DispatchError::Input(error.to_string()))?;
        }

        result
    }

    fn scroll_pulse(&mut self, direction: ScrollDirection) -> Result<(), DispatchError> {
        let lines = match direction {
            ScrollDirection::Down => SCROLL_LINES_PER_PULSE,
            ScrollDirection::Up => -SCROLL_LINES_PER_PULSE,
        };
        self.enigo
            .scroll(lines, Axis::Vertical)
            .map_err(|error| DispatchError::Input(error.to_string()))
    }
}

/// Map a step key name to an enigo key. Accepts the recording vocabulary
/// (`Return`, `BackSpace`, ...) case-insensitively plus single
/// characters.
fn parse_key(name: &str) -> Result<Key, DispatchError> {
    let key = match name.to_lowercase().as_str() {
        "return" | "enter" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "space" => Key::Space,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "meta" | "super" | "cmd" => Key::Meta,
        single if single.chars().count() == 1 => {
            Key::Unicode(single.chars().next().expect("one char"))
        }
        _ => return Err(DispatchError::Input(format!("unknown key '{name}'"))),
    };
    Ok(key)
}

/// Parse `xdotool getmouselocation --shell` output.
fn parse_mouse_location(output: &str) -> Option<(i32, i32)> {
    let mut x = None;
    let mut y = None;
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("X=") {
            x = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("Y=") {
            y = value.trim().parse().ok();
        }
    }
    x.zip(y)
}

fn pointer_via_xdotool() -> Option<(i32, i32)> {
    let output = Command::new("xdotool")
        .args(["getmouselocation", "--shell"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_mouse_location(&String::from_utf8_lossy(&output.stdout))
}

/// Press wait backed by `xinput test-xi2 --root`: streams raw X11 events
/// and resolves on the first button press. Aborting kills the child
/// process, which ends the stream and reports `None`.
pub struct XinputPressWait {
    child: Arc<Mutex<Option<Child>>>,
}

impl XinputPressWait {
    pub fn new() -> Self {
        Self {
            child: Arc::new(Mutex::new(None)),
        }
    }

    fn kill_child(child: &Mutex<Option<Child>>) {
        if let Ok(mut guard) = child.lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

impl Default for XinputPressWait {
    fn default() -> Self {
        Self::new()
    }
}

impl PressWait for XinputPressWait {
    fn wait_for_press(&mut self) -> Option<(i32, i32)> {
        let mut child = match Command::new("xinput")
            .args(["test-xi2", "--root"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                warn!(%error, "xinput unavailable, cannot observe presses");
                return None;
            }
        };
        let stdout = child.stdout.take()?;
        if let Ok(mut guard) = self.child.lock() {
            *guard = Some(child);
        }

        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.contains("RawButtonPress") {
                thread::sleep(PRESS_SAMPLE_DELAY);
                Self::kill_child(&self.child);
                return pointer_via_xdotool();
            }
        }

        // Stream ended without a press: aborted or xinput exited.
        Self::kill_child(&self.child);
        None
    }

    fn abort_fn(&self) -> Box<dyn Fn() + Send + Sync> {
        let child = Arc::clone(&self.child);
        Box::new(move || Self::kill_child(&child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_vocabulary() {
        assert!(matches!(parse_key("Return"), Ok(Key::Return)));
        assert!(matches!(parse_key("BackSpace"), Ok(Key::Backspace)));
        assert!(matches!(parse_key("space"), Ok(Key::Space)));
        assert!(matches!(parse_key("a"), Ok(Key::Unicode('a'))));
        assert!(parse_key("NoSuchKey").is_err());
    }

    #[test]
    fn parses_mouse_location_shell_output() {
        let output = "X=812\nY=403\nSCREEN=0\nWINDOW=1234\n";
        assert_eq!(parse_mouse_location(output), Some((812, 403)));
        assert_eq!(parse_mouse_location("SCREEN=0\n"), None);
    }
}
