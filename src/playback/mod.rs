//! Replay state machine: walks a recording step by step, verifies click
//! fingerprints before acting, and drives the synthetic-input backend.
//! Mismatches suspend the run for an operator decision; dispatch failures
//! end it.

pub mod events;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{DispatchError, InputBackend, OcrBackend, ScreenBackend, WindowHandle};
use crate::geometry;
use crate::recorder::fingerprint::{Fingerprinter, SNAPSHOT_SIZE};
use crate::recorder::matcher;
use crate::recorder::types::{
    ElementProperties, Recording, ScrollDirection, Snapshot, Step,
};

pub use events::ProgressEvent;

/// Granularity of cooperative waits; countdown events fire once per slice.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Running(usize),
    Suspended(usize),
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchDecision {
    Proceed,
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MismatchKind {
    /// The text/color check objected; carries both sides plus one line
    /// per failed axis.
    Properties {
        expected: ElementProperties,
        observed: ElementProperties,
        mismatches: Vec<String>,
    },
    /// The pixel-region check fell below the threshold.
    Region { similarity: f64 },
}

/// Everything the operator needs for an informed abort/proceed decision.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchContext {
    pub step_index: usize,
    pub total_steps: usize,
    pub x: i32,
    pub y: i32,
    pub kind: MismatchKind,
}

/// Why a run ended without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    OperatorAbort { step_index: usize },
    PromptDeclined { step_index: usize },
    Interrupted { step_index: usize },
    DispatchFailed { step_index: usize, error: String },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::OperatorAbort { step_index } => {
                write!(formatter, "aborted by operator at step {}", step_index + 1)
            }
            CancelReason::PromptDeclined { step_index } => {
                write!(formatter, "prompt declined at step {}", step_index + 1)
            }
            CancelReason::Interrupted { step_index } => {
                write!(formatter, "interrupted at step {}", step_index + 1)
            }
            CancelReason::DispatchFailed { step_index, error } => {
                write!(formatter, "dispatch failed at step {}: {error}", step_index + 1)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    Completed,
    Cancelled(CancelReason),
}

/// Presentation seam. Prompts block the engine until the operator
/// responds; `None` from a prompt means cancel.
pub trait Operator {
    fn prompt_text(&mut self, prompt: &str) -> Option<String>;

    /// Masked entry; the returned value must not be persisted anywhere.
    fn prompt_secret(&mut self, prompt: &str) -> Option<String>;

    fn resolve_mismatch(&mut self, context: &MismatchContext) -> MismatchDecision;

    fn notify(&mut self, event: &ProgressEvent);
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    /// Wait after opening the URL before the first interaction.
    pub page_settle: Duration,
    pub focus_settle: Duration,
    pub pointer_settle: Duration,
    pub click_settle: Duration,
    pub type_settle: Duration,
    pub scroll_pulse_gap: Duration,
    pub scroll_settle: Duration,
    pub region_threshold: f64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            page_settle: Duration::from_millis(2500),
            focus_settle: Duration::from_millis(100),
            pointer_settle: Duration::from_millis(100),
            click_settle: Duration::from_millis(400),
            type_settle: Duration::from_millis(200),
            scroll_pulse_gap: Duration::from_millis(100),
            scroll_settle: Duration::from_millis(300),
            region_threshold: matcher::REGION_SIMILARITY_MIN,
        }
    }
}

impl PlaybackOptions {
    /// Zero delays, for tests and scripted runs.
    pub fn immediate() -> Self {
        Self {
            page_settle: Duration::ZERO,
            focus_settle: Duration::ZERO,
            pointer_settle: Duration::ZERO,
            click_settle: Duration::ZERO,
            type_settle: Duration::ZERO,
            scroll_pulse_gap: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            region_threshold: matcher::REGION_SIMILARITY_MIN,
        }
    }
}

/// Cloneable handle for interrupting a run from outside the engine's
/// thread of control.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PlaybackEngine<'a> {
    screen: &'a dyn ScreenBackend,
    ocr: &'a dyn OcrBackend,
    input: &'a mut dyn InputBackend,
    options: PlaybackOptions,
    state: PlaybackState,
    interrupt: Arc<AtomicBool>,
    browser: Option<WindowHandle>,
}

impl<'a> PlaybackEngine<'a> {
    pub fn new(
        screen: &'a dyn ScreenBackend,
        ocr: &'a dyn OcrBackend,
        input: &'a mut dyn InputBackend,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            screen,
            ocr,
            input,
            options,
            state: PlaybackState::Idle,
            interrupt: Arc::new(AtomicBool::new(false)),
            browser: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    /// Walk the recording to completion or a terminal cancellation. The
    /// recording is expected to be validated; the engine owns the active
    /// run exclusively for the duration of this call.
    pub fn run(&mut self, recording: &Recording, operator: &mut dyn Operator) -> ReplayOutcome {
        self.browser = None;
        let total = recording.steps.len();

        for (index, step) in recording.steps.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                return self.cancel(CancelReason::Interrupted { step_index: index }, operator);
            }

            self.state = PlaybackState::Running(index);
            operator.notify(&ProgressEvent::StepStarted {
                index,
                total,
                description: step.describe(index),
            });

            let result = match step {
                Step::Url { value } => self.play_url(index, value, operator),
                Step::Click {
                    x,
                    y,
                    px,
                    py,
                    snapshot,
                    properties,
                } => self.play_click(
                    index,
                    total,
                    (*x, *y),
                    px.zip(*py),
                    snapshot.as_ref(),
                    properties.as_ref(),
                    operator,
                ),
                Step::Input { prompt, value } => {
                    self.play_input(index, prompt.as_deref(), value.as_deref(), operator)
                }
                Step::Password { prompt } => self.play_password(index, prompt, operator),
                Step::Key { key_name } => self.play_key(index, key_name, operator),
                Step::Scroll { direction, amount } => {
                    self.play_scroll(index, *direction, *amount, operator)
                }
                Step::Wait { seconds } => {
                    self.wait_with_countdown(index, Duration::from_secs_f64(*seconds), operator)
                }
            };

            if let Err(reason) = result {
                return self.cancel(reason, operator);
            }
        }

        self.state = PlaybackState::Completed;
        operator.notify(&ProgressEvent::Completed {
            name: recording.name.clone(),
        });
        ReplayOutcome::Completed
    }

    fn cancel(&mut self, reason: CancelReason, operator: &mut dyn Operator) -> ReplayOutcome {
        self.state = PlaybackState::Cancelled;
        operator.notify(&ProgressEvent::Cancelled {
            reason: reason.to_string(),
        });
        ReplayOutcome::Cancelled(reason)
    }

    fn play_url(
        &mut self,
        index: usize,
        url: &str,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        self.input.open_url(url).map_err(fatal(index))?;
        self.wait_with_countdown(index, self.options.page_settle, operator)?;
        // Whatever is focused after the settle is taken to be the browser.
        self.browser = self.input.active_window();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn play_click(
        &mut self,
        index: usize,
        total: usize,
        legacy: (i32, i32),
        fraction: Option<(f64, f64)>,
        snapshot: Option<&Snapshot>,
        properties: Option<&ElementProperties>,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        let (screen_w, screen_h) = geometry::screen_or_default(self.screen.size());
        let (x, y) = match fraction {
            Some((px, py)) => geometry::to_absolute(px, py, screen_w, screen_h),
            None => legacy,
        };

        let mut property_objection = false;
        if let Some(stored) = properties.filter(|p| !p.is_empty()) {
            let observed = Fingerprinter::new(self.screen, self.ocr).capture_properties(x, y);
            let mismatches = matcher::verify_properties(stored, &observed);
            if !mismatches.is_empty() {
                property_objection = true;
                let context = MismatchContext {
                    step_index: index,
                    total_steps: total,
                    x,
                    y,
                    kind: MismatchKind::Properties {
                        expected: stored.clone(),
                        observed,
                        mismatches,
                    },
                };
                self.suspend_for(index, &context, operator)?;
            }
        }

        // The region check only runs when the property check raised no
        // objection; a proceed decision above already covers this click.
        if !property_objection {
            if let Some(stored) = snapshot {
                let (width, height) =
                    matcher::snapshot_dimensions(stored).unwrap_or((SNAPSHOT_SIZE, SNAPSHOT_SIZE));
                let observed = Fingerprinter::new(self.screen, self.ocr)
                    .capture_centered(x, y, width, height);
                if let Some(similarity) = matcher::snapshot_similarity(stored, observed.as_deref())
                {
                    if similarity < self.options.region_threshold {
                        let context = MismatchContext {
                            step_index: index,
                            total_steps: total,
                            x,
                            y,
                            kind: MismatchKind::Region { similarity },
                        };
                        self.suspend_for(index, &context, operator)?;
                    }
                }
            }
        }

        self.focus_browser(index, operator)?;
        self.input.move_pointer(x, y).map_err(fatal(index))?;
        self.settle(index, self.options.pointer_settle, operator)?;
        self.input.click().map_err(fatal(index))?;
        self.settle(index, self.options.click_settle, operator)
    }

    fn play_input(
        &mut self,
        index: usize,
        prompt: Option<&str>,
        fixed: Option<&str>,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        let value = match prompt {
            Some(prompt) => operator
                .prompt_text(prompt)
                .ok_or(CancelReason::PromptDeclined { step_index: index })?,
            None => fixed.unwrap_or_default().to_string(),
        };
        operator.notify(&ProgressEvent::Typing {
            chars: value.chars().count(),
            masked: false,
        });
        self.focus_browser(index, operator)?;
        self.input.type_text(&value).map_err(fatal(index))?;
        self.settle(index, self.options.type_settle, operator)
    }

    fn play_password(
        &mut self,
        index: usize,
        prompt: &str,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        // The solicited value lives only for this step.
        let value = operator
            .prompt_secret(prompt)
            .ok_or(CancelReason::PromptDeclined { step_index: index })?;
        operator.notify(&ProgressEvent::Typing {
            chars: value.chars().count(),
            masked: true,
        });
        self.focus_browser(index, operator)?;
        self.input.type_text(&value).map_err(fatal(index))?;
        self.settle(index, self.options.type_settle, operator)
    }

    fn play_key(
        &mut self,
        index: usize,
        key_name: &str,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        self.focus_browser(index, operator)?;
        self.input.send_key(key_name).map_err(fatal(index))?;
        self.settle(index, self.options.type_settle, operator)
    }

    fn play_scroll(
        &mut self,
        index: usize,
        direction: ScrollDirection,
        amount: u8,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        self.focus_browser(index, operator)?;
        for _ in 0..amount {
            self.input.scroll_pulse(direction).map_err(fatal(index))?;
            self.settle(index, self.options.scroll_pulse_gap, operator)?;
        }
        self.settle(index, self.options.scroll_settle, operator)
    }

    /// Suspend for an operator decision; `Err` on abort.
    fn suspend_for(
        &mut self,
        index: usize,
        context: &MismatchContext,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        self.state = PlaybackState::Suspended(index);
        match operator.resolve_mismatch(context) {
            MismatchDecision::Abort => Err(CancelReason::OperatorAbort { step_index: index }),
            MismatchDecision::Proceed => {
                self.state = PlaybackState::Running(index);
                Ok(())
            }
        }
    }

    fn focus_browser(
        &mut self,
        index: usize,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        if let Some(window) = self.browser.clone() {
            self.input.focus_window(&window).map_err(fatal(index))?;
            self.settle(index, self.options.focus_settle, operator)?;
        }
        Ok(())
    }

    fn settle(
        &mut self,
        index: usize,
        total: Duration,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        self.wait_sliced(index, total, false, operator)
    }

    fn wait_with_countdown(
        &mut self,
        index: usize,
        total: Duration,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        self.wait_sliced(index, total, true, operator)
    }

    /// Sleep in short slices so the presentation layer keeps refreshing
    /// and an interrupt is honored promptly.
    fn wait_sliced(
        &mut self,
        index: usize,
        total: Duration,
        countdown: bool,
        operator: &mut dyn Operator,
    ) -> Result<(), CancelReason> {
        let started = Instant::now();
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(CancelReason::Interrupted { step_index: index });
            }
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }
            let remaining = total - elapsed;
            if countdown {
                operator.notify(&ProgressEvent::Countdown { remaining });
            }
            thread::sleep(remaining.min(WAIT_SLICE));
        }
        if countdown {
            operator.notify(&ProgressEvent::Countdown {
                remaining: Duration::ZERO,
            });
        }
        Ok(())
    }
}

fn fatal(step_index: usize) -> impl FnOnce(DispatchError) -> CancelReason {
    move |error| CancelReason::DispatchFailed {
        step_index,
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_record_time_pacing() {
        let options = PlaybackOptions::default();
        assert_eq!(options.page_settle, Duration::from_millis(2500));
        assert_eq!(options.click_settle, Duration::from_millis(400));
        assert_eq!(options.region_threshold, 0.75);
    }

    #[test]
    fn interrupt_handle_is_shared() {
        let flag = Arc::new(AtomicBool::new(false));
        let handle = InterruptHandle(Arc::clone(&flag));
        let clone = handle.clone();
        clone.interrupt();
        assert!(handle.is_interrupted());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_reason_display_is_one_indexed() {
        let reason = CancelReason::OperatorAbort { step_index: 1 };
        assert_eq!(reason.to_string(), "aborted by operator at step 2");
    }
}
