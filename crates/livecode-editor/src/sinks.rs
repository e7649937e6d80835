//! Output sinks an editor writes run output into.

use std::sync::{Arc, Mutex, MutexGuard};

use livecode_canvas::DrawSurface;

/// Receives `write` output.
pub trait TextSink: Send {
    fn append(&mut self, text: &str);
    fn clear(&mut self);
}

/// Receives `play` events.
pub trait AudioSink: Send {
    fn trigger(&mut self, note: &str, duration: &str);
}

impl TextSink for String {
    fn append(&mut self, text: &str) {
        self.push_str(text);
    }

    fn clear(&mut self) {
        String::clear(self);
    }
}

impl<T: TextSink> TextSink for Arc<Mutex<T>> {
    fn append(&mut self, text: &str) {
        lock(self).append(text);
    }

    fn clear(&mut self) {
        lock(self).clear();
    }
}

/// Records `(note, duration)` pairs.
impl AudioSink for Vec<(String, String)> {
    fn trigger(&mut self, note: &str, duration: &str) {
        self.push((note.to_string(), duration.to_string()));
    }
}

impl<A: AudioSink> AudioSink for Arc<Mutex<A>> {
    fn trigger(&mut self, note: &str, duration: &str) {
        lock(self).trigger(note, duration);
    }
}

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The optional outputs attached to an editor. Missing sinks drop their
/// messages.
#[derive(Default)]
pub struct Sinks {
    pub text: Option<Box<dyn TextSink>>,
    pub canvas: Option<Box<dyn DrawSurface>>,
    pub audio: Option<Box<dyn AudioSink>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, sink: impl TextSink + 'static) -> Self {
        self.text = Some(Box::new(sink));
        self
    }

    pub fn with_canvas(mut self, surface: impl DrawSurface + 'static) -> Self {
        self.canvas = Some(Box::new(surface));
        self
    }

    pub fn with_audio(mut self, sink: impl AudioSink + 'static) -> Self {
        self.audio = Some(Box::new(sink));
        self
    }

    pub fn clear_text(&mut self) {
        if let Some(text) = self.text.as_mut() {
            text.clear();
        }
    }

    /// Clear the whole canvas in pixel space.
    pub fn clear_canvas(&mut self) {
        if let Some(canvas) = self.canvas.as_mut() {
            let (width, height) = canvas.pixel_size();
            canvas.clear_rect(0.0, 0.0, width, height);
        }
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks")
            .field("text", &self.text.is_some())
            .field("canvas", &self.canvas.is_some())
            .field("audio", &self.audio.is_some())
            .finish()
    }
}
