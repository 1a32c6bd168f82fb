// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Debounced gamepad state, published as a snapshot the update pipeline can
//! read at any moment without blocking.
//!
//! One polling worker owns the debounce history outright; everyone else only
//! ever sees the latest published [`InputState`]. The pipeline polls that
//! snapshot while waiting for the user, it never waits on an edge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the worker samples the raw pins
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    Select,
    Start,
    A,
    B,
    Menu,
    Volume,
}

pub const BUTTON_COUNT: usize = 10;

const ALL_BUTTONS: [Button; BUTTON_COUNT] = [
    Button::Up,
    Button::Down,
    Button::Left,
    Button::Right,
    Button::Select,
    Button::Start,
    Button::A,
    Button::B,
    Button::Menu,
    Button::Volume,
];

/// One debounced (or raw) sample of every button
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pressed: [bool; BUTTON_COUNT],
}

impl InputState {
    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed[button as usize]
    }

    pub fn set(&mut self, button: Button, pressed: bool) {
        self.pressed[button as usize] = pressed;
    }

    pub fn with(mut self, button: Button) -> Self {
        self.set(button, true);
        self
    }
}

/// Whatever the pipeline reads its confirmation input from
pub trait InputSource {
    /// Latest debounced state. Never blocks.
    fn read_input(&self) -> InputState;
}

/// Closures make handy test doubles
impl<F: Fn() -> InputState> InputSource for F {
    fn read_input(&self) -> InputState {
        self()
    }
}

/// Two-sample shift-register debouncer
///
/// Each sample shifts every button's history left and ORs the raw level in;
/// a button only changes its published state once the last two samples
/// agree, anything in between keeps the previous value.
pub struct Debouncer {
    history: [u8; BUTTON_COUNT],
    state: InputState,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            // Saturated history so a device that powers up with a held
            // button reports it pressed straight away
            history: [0xff; BUTTON_COUNT],
            state: InputState::default(),
        }
    }

    pub fn sample(&mut self, raw: &InputState) -> InputState {
        for button in ALL_BUTTONS {
            let index = button as usize;
            self.history[index] <<= 1;
            self.history[index] |= u8::from(raw.is_pressed(button));
            match self.history[index] & 0x03 {
                0x00 => self.state.set(button, false),
                0x03 => self.state.set(button, true),
                _ => {} // still bouncing, keep the previous state
            }
        }
        self.state
    }
}

/// Runs the debouncer on its own thread and publishes through a mutex-guarded
/// snapshot
///
/// The worker is the sole writer; [`InputSource::read_input`] hands back a
/// copy of whatever was published last.
pub struct PolledInput {
    snapshot: Arc<Mutex<InputState>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PolledInput {
    /// Start polling `sample_raw` every [`POLL_INTERVAL`]
    pub fn spawn<F>(mut sample_raw: F) -> Self
    where
        F: FnMut() -> InputState + Send + 'static,
    {
        let snapshot = Arc::new(Mutex::new(InputState::default()));
        let running = Arc::new(AtomicBool::new(true));

        let published = Arc::clone(&snapshot);
        let live = Arc::clone(&running);
        let worker = thread::spawn(move || {
            let mut debouncer = Debouncer::new();
            while live.load(Ordering::Relaxed) {
                let state = debouncer.sample(&sample_raw());
                *lock_snapshot(&published) = state;
                thread::sleep(POLL_INTERVAL);
            }
        });

        Self {
            snapshot,
            running,
            worker: Some(worker),
        }
    }
}

impl InputSource for PolledInput {
    fn read_input(&self) -> InputState {
        *lock_snapshot(&self.snapshot)
    }
}

impl Drop for PolledInput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn lock_snapshot(snapshot: &Mutex<InputState>) -> std::sync::MutexGuard<'_, InputState> {
    // A poisoned snapshot still holds a valid last value
    snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_glitch_is_ignored() {
        let mut debouncer = Debouncer::new();
        // Settle to released first
        for _ in 0..4 {
            debouncer.sample(&InputState::default());
        }

        let glitch = InputState::default().with(Button::A);
        let state = debouncer.sample(&glitch);
        assert!(!state.is_pressed(Button::A));

        let state = debouncer.sample(&InputState::default());
        assert!(!state.is_pressed(Button::A));
    }

    #[test]
    fn two_agreeing_samples_latch() {
        let mut debouncer = Debouncer::new();
        for _ in 0..4 {
            debouncer.sample(&InputState::default());
        }

        let held = InputState::default().with(Button::Start);
        debouncer.sample(&held);
        let state = debouncer.sample(&held);
        assert!(state.is_pressed(Button::Start));

        debouncer.sample(&InputState::default());
        let state = debouncer.sample(&InputState::default());
        assert!(!state.is_pressed(Button::Start));
    }

    #[test]
    fn held_button_reports_pressed_from_power_on() {
        let mut debouncer = Debouncer::new();
        let held = InputState::default().with(Button::B);
        let state = debouncer.sample(&held);
        assert!(state.is_pressed(Button::B));
    }

    #[test]
    fn polled_snapshot_publishes() {
        let polled = PolledInput::spawn(|| InputState::default().with(Button::Menu));
        // Two poll intervals are enough for the debouncer to latch
        std::thread::sleep(POLL_INTERVAL * 5);
        assert!(polled.read_input().is_pressed(Button::Menu));
    }
}
