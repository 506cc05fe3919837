//! In-memory desktop, OCR and verifier fakes shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use image::{Rgba, RgbaImage};

use crate::error::{DesktopError, VerifyError};
use crate::ocr::TextRecognizer;
use crate::platform::{Desktop, Key, TargetWindow, WindowQuery};
use crate::verify::{Verification, Verifier};

pub fn window() -> TargetWindow {
    TargetWindow {
        id: "1".to_string(),
        process: Some("Terminal".to_string()),
        title: "Agent".to_string(),
        x: 0,
        y: 0,
        w: 800,
        h: 600,
    }
}

pub fn frame(v: u8) -> RgbaImage {
    RgbaImage::from_pixel(100, 100, Rgba([v, v, v, 255]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Activate,
    Key(Key),
    Click(i64, i64),
    Type(String),
}

pub struct FakeDesktop {
    pub window: Option<TargetWindow>,
    /// Frames served by `capture`, front first. `None` entries fail the capture.
    pub frames: VecDeque<Option<RgbaImage>>,
    /// Served once `frames` is exhausted.
    pub steady: RgbaImage,
    pub inputs: Vec<Input>,
    pub fail_typing: bool,
}

impl Default for FakeDesktop {
    fn default() -> Self {
        Self {
            window: Some(window()),
            frames: VecDeque::new(),
            steady: frame(0),
            inputs: Vec::new(),
            fail_typing: false,
        }
    }
}

impl FakeDesktop {
    pub fn count(&self, input: &Input) -> usize {
        self.inputs.iter().filter(|i| *i == input).count()
    }

    pub fn typed(&self) -> Vec<String> {
        self.inputs
            .iter()
            .filter_map(|i| match i {
                Input::Type(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Desktop for FakeDesktop {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn find_window(&mut self, _query: &WindowQuery) -> Result<Option<TargetWindow>, DesktopError> {
        Ok(self.window.clone())
    }

    fn capture(&mut self, _window: &TargetWindow) -> Result<RgbaImage, DesktopError> {
        match self.frames.pop_front() {
            Some(Some(frame)) => Ok(frame),
            Some(None) => Err(DesktopError::Failed {
                tool: "capture".to_string(),
                code: 1,
                stderr: "screen recording denied".to_string(),
            }),
            None => Ok(self.steady.clone()),
        }
    }

    fn activate(&mut self, _window: &TargetWindow) -> Result<(), DesktopError> {
        self.inputs.push(Input::Activate);
        Ok(())
    }

    fn press_key(&mut self, key: Key) -> Result<(), DesktopError> {
        self.inputs.push(Input::Key(key));
        Ok(())
    }

    fn click(&mut self, x: i64, y: i64) -> Result<(), DesktopError> {
        self.inputs.push(Input::Click(x, y));
        Ok(())
    }

    fn type_text(&mut self, text: &str, _per_char: Duration) -> Result<(), DesktopError> {
        if self.fail_typing {
            return Err(DesktopError::Failed {
                tool: "type".to_string(),
                code: 1,
                stderr: "input blocked".to_string(),
            });
        }
        self.inputs.push(Input::Type(text.to_string()));
        Ok(())
    }
}

/// OCR whose text is swapped by the test between cycles.
#[derive(Clone, Default)]
pub struct FakeOcr {
    pub text: Rc<RefCell<String>>,
}

impl FakeOcr {
    pub fn show(&self, text: &str) {
        *self.text.borrow_mut() = text.to_string();
    }
}

impl TextRecognizer for FakeOcr {
    fn recognize(&mut self, _frame: &RgbaImage) -> Result<String, DesktopError> {
        Ok(self.text.borrow().clone())
    }
}

pub struct StaticVerifier(pub Verification);

impl Verifier for StaticVerifier {
    fn name(&self) -> String {
        "static".to_string()
    }

    fn verify(&mut self) -> Result<Verification, VerifyError> {
        Ok(self.0.clone())
    }
}
