//! Screenshot-history idle detection.
//!
//! Keeps the last N frames of the target window. The agent counts as idle
//! once N frames have been collected and every adjacent pair is nearly equal.

use std::collections::VecDeque;

use image::RgbaImage;
use serde::Serialize;

use crate::compare::frames_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum IdleSignal {
    /// Fewer than `required` frames are in the history.
    Collecting { count: usize, required: usize },
    /// At least one adjacent pair of frames differs.
    Active,
    /// All `required` frames are nearly equal.
    Idle,
}

pub struct IdleDetector {
    history: VecDeque<RgbaImage>,
    required: usize,
    threshold: f64,
}

impl IdleDetector {
    pub fn new(required: usize, threshold: f64) -> Self {
        let required = required.max(2);
        Self {
            history: VecDeque::with_capacity(required + 1),
            required,
            threshold,
        }
    }

    /// Records a frame and reports the idle state of the window.
    ///
    /// An `Active` result leaves the history as it is; only [`reset`](Self::reset) empties it.
    pub fn observe(&mut self, frame: RgbaImage) -> IdleSignal {
        self.history.push_back(frame);
        while self.history.len() > self.required {
            self.history.pop_front();
        }

        if self.history.len() < self.required {
            return IdleSignal::Collecting {
                count: self.history.len(),
                required: self.required,
            };
        }

        let static_run = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .all(|(a, b)| frames_match(a, b, self.threshold));

        if static_run {
            IdleSignal::Idle
        } else {
            IdleSignal::Active
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// The most recently observed frame.
    pub fn latest(&self) -> Option<&RgbaImage> {
        self.history.back()
    }
}
