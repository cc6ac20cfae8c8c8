use base64::Engine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry;

/// Prompt label used when the user leaves one empty.
pub const DEFAULT_INPUT_PROMPT: &str = "Type text";
pub const DEFAULT_PASSWORD_PROMPT: &str = "Password";

/// Scroll amounts are kept in this range at construction time.
pub const SCROLL_AMOUNT_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// Key vocabulary offered while recording; `key` steps may also carry an
/// arbitrary identifier.
pub const KEY_CHOICES: [(&str, &str); 8] = [
    ("Enter", "Return"),
    ("Tab", "Tab"),
    ("Escape", "Escape"),
    ("Backspace", "BackSpace"),
    ("Space", "space"),
    ("Select all", "ctrl+a"),
    ("Copy", "ctrl+c"),
    ("Paste", "ctrl+v"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Text and dominant-color signals captured around a click target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ElementProperties {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.color.is_none()
    }
}

/// A pixel-region capture, stored as base64 PNG inside the recording file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(String);

impl Snapshot {
    pub fn from_png(bytes: &[u8]) -> Self {
        Self(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Decode back to PNG bytes. A corrupt blob yields `None`, which the
    /// matcher treats as "no snapshot".
    pub fn decode(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.0)
            .ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Step {
    Url {
        value: String,
    },
    Click {
        /// Absolute pixels at record time, kept for display and as a
        /// fallback when the fractional coordinates are missing.
        x: i32,
        y: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        px: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        py: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<Snapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<ElementProperties>,
    },
    Input {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// The value is solicited at replay time and never persisted; the
    /// variant has no field it could leak through.
    Password {
        prompt: String,
    },
    Key {
        key_name: String,
    },
    Scroll {
        direction: ScrollDirection,
        amount: u8,
    },
    Wait {
        seconds: f64,
    },
}

impl Step {
    pub fn click_at(
        x: i32,
        y: i32,
        screen: (u32, u32),
        snapshot: Option<Snapshot>,
        properties: Option<ElementProperties>,
    ) -> Self {
        let (px, py) = geometry::to_fraction(x, y, screen.0, screen.1);
        Self::Click {
            x,
            y,
            px: Some(px),
            py: Some(py),
            snapshot,
            properties: properties.filter(|p| !p.is_empty()),
        }
    }

    pub fn prompted_input(prompt: &str) -> Self {
        let prompt = prompt.trim();
        Self::Input {
            prompt: Some(if prompt.is_empty() {
                DEFAULT_INPUT_PROMPT.to_string()
            } else {
                prompt.to_string()
            }),
            value: None,
        }
    }

    pub fn fixed_input(value: &str) -> Self {
        Self::Input {
            prompt: None,
            value: Some(value.to_string()),
        }
    }

    pub fn password(prompt: &str) -> Self {
        let prompt = prompt.trim();
        Self::Password {
            prompt: if prompt.is_empty() {
                DEFAULT_PASSWORD_PROMPT.to_string()
            } else {
                prompt.to_string()
            },
        }
    }

    pub fn key(key_name: &str) -> Self {
        Self::Key {
            key_name: key_name.to_string(),
        }
    }

    pub fn scroll(direction: ScrollDirection, amount: i64) -> Self {
        let amount = amount.clamp(
            i64::from(*SCROLL_AMOUNT_RANGE.start()),
            i64::from(*SCROLL_AMOUNT_RANGE.end()),
        ) as u8;
        Self::Scroll { direction, amount }
    }

    pub fn wait(seconds: f64) -> Self {
        Self::Wait {
            seconds: seconds.max(0.0),
        }
    }

    /// One-line description for step lists and replay progress.
    pub fn describe(&self, index: usize) -> String {
        let body = match self {
            Step::Url { value } => format!("open {}", truncate(value, 40)),
            Step::Click { x, y, properties, .. } => {
                match properties.as_ref().and_then(|p| p.text.as_deref()) {
                    Some(text) => format!("click '{}'", truncate(text, 20)),
                    None => format!("click ({x}, {y})"),
                }
            }
            Step::Input {
                prompt: Some(prompt),
                ..
            } => format!("ask [{}]", truncate(prompt, 20)),
            Step::Input { value, .. } => {
                format!("type \"{}\"", truncate(value.as_deref().unwrap_or(""), 20))
            }
            Step::Password { prompt } => format!("password [{}]", truncate(prompt, 20)),
            Step::Key { key_name } => format!("key {key_name}"),
            Step::Scroll { direction, amount } => {
                let arrow = match direction {
                    ScrollDirection::Up => "up",
                    ScrollDirection::Down => "down",
                };
                format!("scroll {arrow} x{amount}")
            }
            Step::Wait { seconds } => format!("wait {seconds}s"),
        };
        format!("{}. {body}", index + 1)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error("recording has no steps")]
    Empty,
    #[error("step 0 must be the opening url step")]
    MissingLeadingUrl,
    #[error("unexpected url step at index {0}")]
    StrayUrl(usize),
    #[error("input step at index {0} must have exactly one of prompt or value")]
    AmbiguousInput(usize),
    #[error("scroll amount out of range at index {0}")]
    ScrollAmountOutOfRange(usize),
    #[error("negative wait at index {0}")]
    NegativeWait(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub name: String,
    pub created: NaiveDate,
    pub steps: Vec<Step>,
}

impl Recording {
    /// Create a recording whose only step opens `url`. A missing scheme
    /// gets `https://` prefixed.
    pub fn new(name: &str, url: &str, created: NaiveDate) -> Self {
        let url = url.trim();
        let value = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("https://{url}")
        };
        Self {
            name: name.trim().to_string(),
            created,
            steps: vec![Step::Url { value }],
        }
    }

    /// Check the step-sequence invariants. Run after every load and
    /// before every save.
    pub fn validate(&self) -> Result<(), RecordingError> {
        if self.steps.is_empty() {
            return Err(RecordingError::Empty);
        }
        if !matches!(self.steps[0], Step::Url { .. }) {
            return Err(RecordingError::MissingLeadingUrl);
        }
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Url { .. } if index > 0 => return Err(RecordingError::StrayUrl(index)),
                Step::Input { prompt, value } => {
                    if prompt.is_some() == value.is_some() {
                        return Err(RecordingError::AmbiguousInput(index));
                    }
                }
                Step::Scroll { amount, .. } => {
                    if !SCROLL_AMOUNT_RANGE.contains(amount) {
                        return Err(RecordingError::ScrollAmountOutOfRange(index));
                    }
                }
                Step::Wait { seconds } => {
                    if *seconds < 0.0 {
                        return Err(RecordingError::NegativeWait(index));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
    }

    #[test]
    fn step_roundtrip_json() {
        let steps = vec![
            Step::Url {
                value: "https://example.com".to_string(),
            },
            Step::click_at(100, 200, (1920, 1080), None, None),
            Step::prompted_input("What to search?"),
            Step::fixed_input("hello"),
            Step::password("Mail password"),
            Step::key("ctrl+v"),
            Step::scroll(ScrollDirection::Down, 3),
            Step::wait(1.5),
        ];
        let json = serde_json::to_string(&steps).unwrap();
        let back: Vec<Step> = serde_json::from_str(&json).unwrap();
        assert_eq!(steps, back);
    }

    #[test]
    fn step_tags_are_lowercase_with_camel_case_fields() {
        let json = serde_json::to_string(&Step::key("Return")).unwrap();
        assert_eq!(json, r#"{"type":"key","keyName":"Return"}"#);
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        let result = serde_json::from_str::<Step>(r#"{"type":"zoom","factor":2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn scroll_amount_clamps_into_range() {
        assert_eq!(
            Step::scroll(ScrollDirection::Down, 15),
            Step::Scroll {
                direction: ScrollDirection::Down,
                amount: 10
            }
        );
        assert_eq!(
            Step::scroll(ScrollDirection::Up, 0),
            Step::Scroll {
                direction: ScrollDirection::Up,
                amount: 1
            }
        );
    }

    #[test]
    fn password_step_never_serializes_a_value() {
        let json = serde_json::to_string(&Step::password("Mail")).unwrap();
        assert!(!json.contains("value"));
        assert_eq!(json, r#"{"type":"password","prompt":"Mail"}"#);
    }

    #[test]
    fn click_carries_fractions() {
        let step = Step::click_at(960, 540, (1920, 1080), None, None);
        let Step::Click { px, py, .. } = &step else {
            panic!("expected click");
        };
        assert_eq!(px.unwrap(), 0.5);
        assert_eq!(py.unwrap(), 0.5);
    }

    #[test]
    fn new_recording_prefixes_scheme() {
        let recording = Recording::new("demo", "example.com", sample_date());
        assert_eq!(
            recording.steps[0],
            Step::Url {
                value: "https://example.com".to_string()
            }
        );
        recording.validate().expect("fresh recording is valid");
    }

    #[test]
    fn validate_rejects_ambiguous_input() {
        let mut recording = Recording::new("demo", "https://x", sample_date());
        recording.steps.push(Step::Input {
            prompt: Some("p".to_string()),
            value: Some("v".to_string()),
        });
        assert_eq!(recording.validate(), Err(RecordingError::AmbiguousInput(1)));
    }

    #[test]
    fn validate_rejects_stray_url() {
        let mut recording = Recording::new("demo", "https://x", sample_date());
        recording.steps.push(Step::Url {
            value: "https://y".to_string(),
        });
        assert_eq!(recording.validate(), Err(RecordingError::StrayUrl(1)));
    }

    #[test]
    fn validate_requires_leading_url() {
        let recording = Recording {
            name: "demo".to_string(),
            created: sample_date(),
            steps: vec![Step::wait(1.0)],
        };
        assert_eq!(recording.validate(), Err(RecordingError::MissingLeadingUrl));
    }

    #[test]
    fn describe_is_compact() {
        assert_eq!(
            Step::scroll(ScrollDirection::Down, 3).describe(4),
            "5. scroll down x3"
        );
        assert_eq!(Step::key("Return").describe(1), "2. key Return");
    }
}
