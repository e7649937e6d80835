//! In-memory surface that records pixel-space primitives.

use std::f64::consts::TAU;

use crate::surface::DrawSurface;

/// A stroked primitive or clear, in surface pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    /// Elliptical arc; `rx != ry` when drawn under a non-uniform scale.
    Arc {
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
        start: f64,
        end: f64,
    },
    Rect { x: f64, y: f64, w: f64, h: f64 },
    Clear { x: f64, y: f64, w: f64, h: f64 },
}

impl Shape {
    pub fn is_full_circle(&self) -> bool {
        matches!(self, Shape::Arc { start, end, .. } if (end - start).abs() >= TAU)
    }
}

/// Records everything drawn to it, applying the current scale transform.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: f64,
    height: f64,
    scale: (f64, f64),
    stack: Vec<(f64, f64)>,
    cursor: Option<(f64, f64)>,
    path: Vec<Shape>,
    shapes: Vec<Shape>,
}

impl RecordingSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            scale: (1.0, 1.0),
            stack: Vec::new(),
            cursor: None,
            path: Vec::new(),
            shapes: Vec::new(),
        }
    }

    /// Everything stroked or cleared so far, in order.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// Shapes still visible: everything after the last full-surface clear,
    /// including any partial clears.
    pub fn visible(&self) -> &[Shape] {
        let start = self
            .shapes
            .iter()
            .rposition(|s| self.covers_surface(s))
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.shapes[start..]
    }

    pub fn current_scale(&self) -> (f64, f64) {
        self.scale
    }

    pub fn save_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn reset(&mut self) {
        self.scale = (1.0, 1.0);
        self.stack.clear();
        self.cursor = None;
        self.path.clear();
        self.shapes.clear();
    }

    fn covers_surface(&self, shape: &Shape) -> bool {
        matches!(shape, Shape::Clear { x, y, w, h }
            if *x <= 0.0 && *y <= 0.0 && x + w >= self.width && y + h >= self.height)
    }

    fn map(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale.0, y * self.scale.1)
    }
}

impl DrawSurface for RecordingSurface {
    fn pixel_size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    fn save(&mut self) {
        self.stack.push(self.scale);
    }

    fn restore(&mut self) {
        if let Some(scale) = self.stack.pop() {
            self.scale = scale;
        }
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        self.scale = (self.scale.0 * sx, self.scale.1 * sy);
    }

    fn begin_path(&mut self) {
        self.path.clear();
        self.cursor = None;
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.cursor = Some(self.map(x, y));
    }

    fn line_to(&mut self, x: f64, y: f64) {
        let to = self.map(x, y);
        if let Some((x1, y1)) = self.cursor {
            self.path.push(Shape::Line {
                x1,
                y1,
                x2: to.0,
                y2: to.1,
            });
        }
        self.cursor = Some(to);
    }

    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64) {
        let (cx, cy) = self.map(x, y);
        self.path.push(Shape::Arc {
            cx,
            cy,
            rx: radius * self.scale.0,
            ry: radius * self.scale.1,
            start,
            end,
        });
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let (x, y) = self.map(x, y);
        let (w, h) = self.map(w, h);
        self.path.push(Shape::Rect { x, y, w, h });
    }

    fn stroke(&mut self) {
        self.shapes.extend(self.path.iter().cloned());
    }

    fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let (x, y) = self.map(x, y);
        let (w, h) = self.map(w, h);
        self.shapes.push(Shape::Clear { x, y, w, h });
    }
}
