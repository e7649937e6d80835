//! Immediate-mode drawing surface.

use std::sync::{Arc, Mutex};

/// A 2D immediate-mode drawing target, modelled on the HTML canvas context.
///
/// Coordinates passed to path methods are in the surface's current
/// coordinate system, i.e. after any `scale` calls since the last `save`.
pub trait DrawSurface: Send {
    /// Actual pixel dimensions as `(width, height)`.
    fn pixel_size(&self) -> (f64, f64);

    fn save(&mut self);
    fn restore(&mut self);
    fn scale(&mut self, sx: f64, sy: f64);

    fn begin_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    /// Arc around `(x, y)` from `start` to `end` radians.
    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64);
    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64);
    fn stroke(&mut self);

    /// Clear a region in the current coordinate system.
    fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64);
}

/// Shared surfaces let the host inspect a canvas it handed to an editor.
impl<S: DrawSurface> DrawSurface for Arc<Mutex<S>> {
    fn pixel_size(&self) -> (f64, f64) {
        lock(self).pixel_size()
    }

    fn save(&mut self) {
        lock(self).save()
    }

    fn restore(&mut self) {
        lock(self).restore()
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        lock(self).scale(sx, sy)
    }

    fn begin_path(&mut self) {
        lock(self).begin_path()
    }

    fn move_to(&mut self, x: f64, y: f64) {
        lock(self).move_to(x, y)
    }

    fn line_to(&mut self, x: f64, y: f64) {
        lock(self).line_to(x, y)
    }

    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64) {
        lock(self).arc(x, y, radius, start, end)
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        lock(self).rect(x, y, w, h)
    }

    fn stroke(&mut self) {
        lock(self).stroke()
    }

    fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        lock(self).clear_rect(x, y, w, h)
    }
}

fn lock<S>(surface: &Mutex<S>) -> std::sync::MutexGuard<'_, S> {
    surface.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The coordinate space drawing commands are authored against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalSize {
    pub width: f64,
    pub height: f64,
}

impl Default for LogicalSize {
    fn default() -> Self {
        Self {
            width: 300.0,
            height: 300.0,
        }
    }
}

impl LogicalSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Scale factors mapping this logical space onto `pixel_size`.
    pub fn scale_for(&self, (px_width, px_height): (f64, f64)) -> (f64, f64) {
        let sx = if self.width > 0.0 { px_width / self.width } else { 1.0 };
        let sy = if self.height > 0.0 { px_height / self.height } else { 1.0 };
        (sx, sy)
    }
}
