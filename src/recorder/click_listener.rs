//! Single-shot listener for the next pointer press, used while recording
//! a click step.
//!
//! The blocking wait runs on a background thread and hands its one result
//! back through a channel; the recording flow polls it cooperatively with
//! `recv_timeout`. Cancelling (or dropping the listener) aborts the wait,
//! which then reports `None`.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::PressWait;

pub struct PressListener {
    receiver: Receiver<Option<(i32, i32)>>,
    abort: Box<dyn Fn() + Send + Sync>,
    finished: bool,
    _handle: JoinHandle<()>,
}

impl PressListener {
    /// Start waiting for one press on a background thread.
    pub fn spawn<W>(mut source: W) -> Self
    where
        W: PressWait + Send + 'static,
    {
        let abort = source.abort_fn();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            // Ignore a dropped receiver: the listener was cancelled.
            let _ = tx.send(source.wait_for_press());
        });
        Self {
            receiver: rx,
            abort,
            finished: false,
            _handle: handle,
        }
    }

    /// Poll for the press result. `None` means still waiting; `Some(None)`
    /// means the wait was aborted.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Option<(i32, i32)>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.finished = true;
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Some(None)
            }
        }
    }

    /// Abort a pending wait. The background thread unblocks and exits.
    pub fn cancel(&self) {
        (self.abort)();
    }
}

impl Drop for PressListener {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Sender;
    use std::sync::Mutex;

    /// Press source driven by a channel: the test injects the press, and
    /// `abort_fn` injects `None`.
    struct ScriptedPress {
        receiver: Mutex<Receiver<Option<(i32, i32)>>>,
        sender: Sender<Option<(i32, i32)>>,
    }

    impl ScriptedPress {
        fn new() -> (Self, Sender<Option<(i32, i32)>>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    receiver: Mutex::new(rx),
                    sender: tx.clone(),
                },
                tx,
            )
        }
    }

    impl PressWait for ScriptedPress {
        fn wait_for_press(&mut self) -> Option<(i32, i32)> {
            self.receiver
                .lock()
                .expect("press receiver lock")
                .recv()
                .unwrap_or(None)
        }

        fn abort_fn(&self) -> Box<dyn Fn() + Send + Sync> {
            let sender = self.sender.clone();
            Box::new(move || {
                let _ = sender.send(None);
            })
        }
    }

    #[test]
    fn delivers_one_press_result() {
        let (source, inject) = ScriptedPress::new();
        let mut listener = PressListener::spawn(source);

        assert_eq!(listener.recv_timeout(Duration::from_millis(10)), None);

        inject.send(Some((120, 340))).expect("inject press");
        let result = listener
            .recv_timeout(Duration::from_secs(1))
            .expect("press arrives");
        assert_eq!(result, Some((120, 340)));
    }

    #[test]
    fn cancel_unblocks_with_none() {
        let (source, _inject) = ScriptedPress::new();
        let mut listener = PressListener::spawn(source);

        listener.cancel();
        let result = listener
            .recv_timeout(Duration::from_secs(1))
            .expect("abort arrives");
        assert_eq!(result, None);
    }
}
