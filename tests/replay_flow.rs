//! End-to-end replay runs against scripted backends: no display, OCR, or
//! input simulation involved, only the engine's observable behavior.

use std::collections::VecDeque;
use std::io::Cursor;

use chrono::NaiveDate;
use image::{DynamicImage, Rgb, RgbImage};

use macrocast::backend::{
    CaptureError, DispatchError, InputBackend, OcrBackend, OcrError, ScreenBackend, WindowHandle,
};
use macrocast::playback::{
    CancelReason, MismatchContext, MismatchDecision, MismatchKind, Operator, PlaybackEngine,
    PlaybackOptions, PlaybackState, ProgressEvent, ReplayOutcome,
};
use macrocast::recorder::types::{ElementProperties, Snapshot, Step};
use macrocast::recorder::{Recording, RecordingStore};

fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn recording(steps: Vec<Step>) -> Recording {
    let recording = Recording {
        name: "scripted".to_string(),
        created: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
        steps,
    };
    recording.validate().expect("test recording is valid");
    recording
}

fn url_step() -> Step {
    Step::Url {
        value: "https://example.com".to_string(),
    }
}

struct StubScreen {
    size: Option<(u32, u32)>,
    capture: Option<Vec<u8>>,
}

impl ScreenBackend for StubScreen {
    fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    fn pointer(&self) -> Option<(i32, i32)> {
        None
    }

    fn capture_region(
        &self,
        _x: i32,
        _y: i32,
        _width: u32,
        _height: u32,
    ) -> Result<Vec<u8>, CaptureError> {
        self.capture
            .clone()
            .ok_or_else(|| CaptureError::Failed("no display".to_string()))
    }
}

struct NoOcr;

impl OcrBackend for NoOcr {
    fn recognize_line(&self, _png: &[u8]) -> Result<String, OcrError> {
        Err(OcrError::NotAvailable("scripted".to_string()))
    }
}

#[derive(Default)]
struct ScriptedInput {
    log: Vec<String>,
    fail_open_url: bool,
}

impl InputBackend for ScriptedInput {
    fn open_url(&mut self, url: &str) -> Result<(), DispatchError> {
        if self.fail_open_url {
            return Err(DispatchError::Launch("no browser".to_string()));
        }
        self.log.push(format!("open:{url}"));
        Ok(())
    }

    fn active_window(&mut self) -> Option<WindowHandle> {
        Some(WindowHandle("w-1".to_string()))
    }

    fn focus_window(&mut self, window: &WindowHandle) -> Result<(), DispatchError> {
        self.log.push(format!("focus:{}", window.0));
        Ok(())
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<(), DispatchError> {
        self.log.push(format!("move:{x},{y}"));
        Ok(())
    }

    fn click(&mut self) -> Result<(), DispatchError> {
        self.log.push("click".to_string());
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<(), DispatchError> {
        self.log.push(format!("type:{text}"));
        Ok(())
    }

    fn send_key(&mut self, chord: &str) -> Result<(), DispatchError> {
        self.log.push(format!("key:{chord}"));
        Ok(())
    }

    fn scroll_pulse(
        &mut self,
        direction: macrocast::recorder::types::ScrollDirection,
    ) -> Result<(), DispatchError> {
        self.log.push(format!("scroll:{direction:?}"));
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedOperator {
    decisions: VecDeque<MismatchDecision>,
    text_responses: VecDeque<Option<String>>,
    secret_responses: VecDeque<Option<String>>,
    mismatches: Vec<MismatchContext>,
    events: Vec<ProgressEvent>,
}

impl Operator for ScriptedOperator {
    fn prompt_text(&mut self, _prompt: &str) -> Option<String> {
        self.text_responses
            .pop_front()
            .expect("unexpected text prompt")
    }

    fn prompt_secret(&mut self, _prompt: &str) -> Option<String> {
        self.secret_responses
            .pop_front()
            .expect("unexpected secret prompt")
    }

    fn resolve_mismatch(&mut self, context: &MismatchContext) -> MismatchDecision {
        self.mismatches.push(context.clone());
        self.decisions.pop_front().expect("unexpected suspension")
    }

    fn notify(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}

#[test]
fn replay_without_fingerprints_completes_without_suspension() {
    let screen = StubScreen {
        size: Some((200, 100)),
        capture: None,
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator::default();

    let recording = recording(vec![
        url_step(),
        Step::Click {
            x: 10,
            y: 10,
            px: Some(0.5),
            py: Some(0.5),
            snapshot: None,
            properties: None,
        },
        Step::wait(0.2),
    ]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(engine.state(), PlaybackState::Completed);
    drop(engine);

    // Fractional coordinates win over the stale absolute ones.
    assert_eq!(
        input.log,
        vec![
            "open:https://example.com",
            "focus:w-1",
            "move:100,50",
            "click",
        ]
    );
    assert!(operator.mismatches.is_empty());
    assert!(operator
        .events
        .iter()
        .any(|event| matches!(event, ProgressEvent::Countdown { .. })));
    assert!(operator
        .events
        .iter()
        .any(|event| matches!(event, ProgressEvent::Completed { .. })));
}

#[test]
fn color_mismatch_suspends_and_abort_cancels() {
    // Stored lavender vs observed black: channel distance 450, over the
    // 150 tolerance.
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: Some(solid_png(120, 60, [0, 0, 0])),
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator {
        decisions: VecDeque::from([MismatchDecision::Abort]),
        ..Default::default()
    };

    let recording = recording(vec![
        url_step(),
        Step::Click {
            x: 50,
            y: 50,
            px: None,
            py: None,
            snapshot: None,
            properties: Some(ElementProperties {
                text: None,
                color: Some("#9683a9".to_string()),
            }),
        },
        Step::wait(5.0),
    ]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(
        outcome,
        ReplayOutcome::Cancelled(CancelReason::OperatorAbort { step_index: 1 })
    );
    assert_eq!(engine.state(), PlaybackState::Cancelled);
    drop(engine);

    // The click was never dispatched and the wait step never ran.
    assert_eq!(input.log, vec!["open:https://example.com"]);

    assert_eq!(operator.mismatches.len(), 1);
    let context = &operator.mismatches[0];
    assert_eq!(context.step_index, 1);
    let MismatchKind::Properties { mismatches, .. } = &context.kind else {
        panic!("expected a property mismatch");
    };
    assert_eq!(mismatches.len(), 1);
    assert!(mismatches[0].contains("#9683a9"));
}

#[test]
fn color_mismatch_proceed_decision_clicks_anyway() {
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: Some(solid_png(120, 60, [0, 0, 0])),
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator {
        decisions: VecDeque::from([MismatchDecision::Proceed]),
        ..Default::default()
    };

    let recording = recording(vec![
        url_step(),
        Step::Click {
            x: 50,
            y: 50,
            px: None,
            py: None,
            snapshot: None,
            properties: Some(ElementProperties {
                text: None,
                color: Some("#9683a9".to_string()),
            }),
        },
    ]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(outcome, ReplayOutcome::Completed);
    drop(engine);
    assert!(input.log.contains(&"click".to_string()));
}

#[test]
fn region_mismatch_is_a_separate_suspension() {
    // No properties stored, so only the snapshot check runs: stored
    // white region vs observed black region has similarity 0.
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: Some(solid_png(60, 60, [0, 0, 0])),
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator {
        decisions: VecDeque::from([MismatchDecision::Proceed]),
        ..Default::default()
    };

    let recording = recording(vec![
        url_step(),
        Step::Click {
            x: 50,
            y: 50,
            px: None,
            py: None,
            snapshot: Some(Snapshot::from_png(&solid_png(60, 60, [255, 255, 255]))),
            properties: None,
        },
    ]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(outcome, ReplayOutcome::Completed);
    drop(engine);

    assert_eq!(operator.mismatches.len(), 1);
    let MismatchKind::Region { similarity } = &operator.mismatches[0].kind else {
        panic!("expected a region mismatch");
    };
    assert!(*similarity < 0.01, "similarity {similarity}");
    assert!(input.log.contains(&"click".to_string()));
}

#[test]
fn capture_failure_fails_open_on_both_checks() {
    // Both a snapshot and properties are stored, but the screen cannot
    // be captured: verification must pass without consulting the
    // operator, never block the run.
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: None,
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator::default();

    let recording = recording(vec![
        url_step(),
        Step::Click {
            x: 50,
            y: 50,
            px: None,
            py: None,
            snapshot: Some(Snapshot::from_png(&solid_png(60, 60, [255, 255, 255]))),
            properties: Some(ElementProperties {
                text: Some("Login".to_string()),
                color: Some("#9683a9".to_string()),
            }),
        },
    ]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(outcome, ReplayOutcome::Completed);
    drop(engine);
    assert!(operator.mismatches.is_empty());
    assert!(input.log.contains(&"click".to_string()));
}

#[test]
fn declined_prompt_cancels_the_run() {
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: None,
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator {
        text_responses: VecDeque::from([None]),
        ..Default::default()
    };

    let recording = recording(vec![url_step(), Step::prompted_input("Search for?")]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(
        outcome,
        ReplayOutcome::Cancelled(CancelReason::PromptDeclined { step_index: 1 })
    );
    drop(engine);
    assert!(!input.log.iter().any(|entry| entry.starts_with("type:")));
}

#[test]
fn fixed_input_key_and_scroll_dispatch_in_order() {
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: None,
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator {
        secret_responses: VecDeque::from([Some("hunter2".to_string())]),
        ..Default::default()
    };

    let recording = recording(vec![
        url_step(),
        Step::fixed_input("hello"),
        Step::password("Mail password"),
        Step::key("ctrl+v"),
        Step::scroll(macrocast::recorder::types::ScrollDirection::Down, 2),
    ]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(outcome, ReplayOutcome::Completed);
    drop(engine);
    assert_eq!(
        input.log,
        vec![
            "open:https://example.com",
            "focus:w-1",
            "type:hello",
            "focus:w-1",
            "type:hunter2",
            "focus:w-1",
            "key:ctrl+v",
            "focus:w-1",
            "scroll:Down",
            "scroll:Down",
        ]
    );

    // The masked typing indicator never carries the secret itself.
    assert!(operator.events.iter().any(|event| matches!(
        event,
        ProgressEvent::Typing {
            masked: true,
            chars: 7
        }
    )));
}

#[test]
fn dispatch_failure_is_fatal_to_the_run() {
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: None,
    };
    let mut input = ScriptedInput {
        fail_open_url: true,
        ..Default::default()
    };
    let mut operator = ScriptedOperator::default();

    let recording = recording(vec![url_step(), Step::wait(5.0)]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    let outcome = engine.run(&recording, &mut operator);

    let ReplayOutcome::Cancelled(CancelReason::DispatchFailed { step_index, error }) = outcome
    else {
        panic!("expected a dispatch failure");
    };
    assert_eq!(step_index, 0);
    assert!(error.contains("no browser"));
    drop(engine);
    assert!(input.log.is_empty());
}

#[test]
fn preset_interrupt_cancels_before_any_dispatch() {
    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: None,
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator::default();

    let recording = recording(vec![url_step()]);

    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    engine.interrupt_handle().interrupt();
    let outcome = engine.run(&recording, &mut operator);

    assert_eq!(
        outcome,
        ReplayOutcome::Cancelled(CancelReason::Interrupted { step_index: 0 })
    );
    drop(engine);
    assert!(input.log.is_empty());
}

#[test]
fn replayed_secrets_never_reach_the_recording_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RecordingStore::at(dir.path()).expect("store");

    let recording = recording(vec![url_step(), Step::password("Mail password")]);
    let path = store.save(&recording).expect("save");

    let screen = StubScreen {
        size: Some((1920, 1080)),
        capture: None,
    };
    let mut input = ScriptedInput::default();
    let mut operator = ScriptedOperator {
        secret_responses: VecDeque::from([Some("hunter2".to_string())]),
        ..Default::default()
    };

    let loaded = store.load(&path).expect("load");
    let mut engine = PlaybackEngine::new(&screen, &NoOcr, &mut input, PlaybackOptions::immediate());
    assert_eq!(engine.run(&loaded, &mut operator), ReplayOutcome::Completed);
    drop(engine);

    // Persist again after the run: the file still carries only the prompt.
    store.save(&loaded).expect("save again");
    let contents = std::fs::read_to_string(&path).expect("read file");
    assert!(!contents.contains("hunter2"));
    assert!(contents.contains("Mail password"));
}
