//! Canvas output for LiveCode runs.
//!
//! Remote programs draw against a fixed logical coordinate space. The
//! [`CommandRegistry`] maps command names to rendering functions and scales
//! them onto whatever [`DrawSurface`] the host provides.

pub mod commands;
pub mod recording;
pub mod surface;
pub mod svg;

pub use commands::{CanvasError, CommandRegistry, CommandSpec, DrawFn, Space};
pub use recording::{RecordingSurface, Shape};
pub use surface::{DrawSurface, LogicalSize};
pub use svg::to_svg;
