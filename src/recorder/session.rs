use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use super::storage::{RecordingStore, StorageError};
use super::types::{Recording, RecordingError, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("the opening url step cannot be removed or displaced")]
    OpeningUrlPinned,
    #[error("step index {0} out of range")]
    OutOfRange(usize),
    #[error("order is not a permutation of the current steps")]
    BadOrder,
    #[error("{0}")]
    Step(#[from] RecordingError),
}

/// Owned editing handle for one recording. Replaces any notion of an
/// ambient "current recording": callers hold the session and pass it
/// around explicitly.
#[derive(Debug, Clone)]
pub struct EditSession {
    recording: Recording,
    path: Option<PathBuf>,
}

impl EditSession {
    pub fn create(name: &str, url: &str, created: NaiveDate) -> Self {
        Self {
            recording: Recording::new(name, url, created),
            path: None,
        }
    }

    pub fn open(store: &RecordingStore, name: &str) -> Result<Self, StorageError> {
        let path = store.path_for(name);
        let recording = store.load(&path)?;
        Ok(Self {
            recording,
            path: Some(path),
        })
    }

    pub fn from_recording(recording: Recording, path: Option<PathBuf>) -> Self {
        Self { recording, path }
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn step_count(&self) -> usize {
        self.recording.steps.len()
    }

    /// Append a step. Only the creation constructor may introduce the
    /// url step, so one arriving here is rejected.
    pub fn push_step(&mut self, step: Step) -> Result<(), EditError> {
        if matches!(step, Step::Url { .. }) {
            return Err(EditError::Step(RecordingError::StrayUrl(
                self.recording.steps.len(),
            )));
        }
        self.recording.steps.push(step);
        Ok(())
    }

    pub fn remove_step(&mut self, index: usize) -> Result<Step, EditError> {
        if index == 0 {
            return Err(EditError::OpeningUrlPinned);
        }
        if index >= self.recording.steps.len() {
            return Err(EditError::OutOfRange(index));
        }
        Ok(self.recording.steps.remove(index))
    }

    pub fn move_step_up(&mut self, index: usize) -> Result<(), EditError> {
        if index <= 1 {
            return Err(EditError::OpeningUrlPinned);
        }
        if index >= self.recording.steps.len() {
            return Err(EditError::OutOfRange(index));
        }
        self.recording.steps.swap(index, index - 1);
        Ok(())
    }

    pub fn move_step_down(&mut self, index: usize) -> Result<(), EditError> {
        if index == 0 {
            return Err(EditError::OpeningUrlPinned);
        }
        if index + 1 >= self.recording.steps.len() {
            return Err(EditError::OutOfRange(index));
        }
        self.recording.steps.swap(index, index + 1);
        Ok(())
    }

    /// Apply a full reordering, e.g. from a drag-and-drop list. `order`
    /// must be a permutation of the current indices keeping 0 first.
    pub fn reorder(&mut self, order: &[usize]) -> Result<(), EditError> {
        let len = self.recording.steps.len();
        if order.len() != len || order.first() != Some(&0) {
            return Err(EditError::BadOrder);
        }
        let mut seen = vec![false; len];
        for &index in order {
            if index >= len || seen[index] {
                return Err(EditError::BadOrder);
            }
            seen[index] = true;
        }
        let old = std::mem::take(&mut self.recording.steps);
        let mut old: Vec<Option<Step>> = old.into_iter().map(Some).collect();
        self.recording.steps = order
            .iter()
            .map(|&index| old[index].take().expect("checked permutation"))
            .collect();
        Ok(())
    }

    /// Persist through the store; remembers the path for later saves.
    pub fn save(&mut self, store: &RecordingStore) -> Result<PathBuf, StorageError> {
        let path = store.save(&self.recording)?;
        self.path = Some(path.clone());
        Ok(path)
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.recording
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| step.describe(index))
            .collect()
    }
}
