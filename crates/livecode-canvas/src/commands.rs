//! Drawing-command registry.
//!
//! A registry is built once and never mutated afterwards; hosts that want a
//! different vocabulary build their own and inject it into the router.

use std::collections::HashMap;
use std::f64::consts::TAU;

use livecode_core::DrawCommand;
use thiserror::Error;
use tracing::trace;

use crate::surface::{DrawSurface, LogicalSize};

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("unknown draw command: {0}")]
    UnknownCommand(String),
}

/// A pure rendering function for one command.
pub type DrawFn = fn(&mut dyn DrawSurface, &DrawCommand);

/// Coordinate space a command is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// Logical units, scaled onto the surface.
    Logical,
    /// Raw surface pixels, no scaling applied.
    Pixel,
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub space: Space,
    pub draw: DrawFn,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

/// Immutable mapping from command name to rendering function.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

/// Builder for a [`CommandRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    commands: HashMap<String, CommandSpec>,
}

impl RegistryBuilder {
    pub fn register(mut self, name: &str, space: Space, draw: DrawFn) -> Self {
        self.commands
            .insert(name.to_string(), CommandSpec { space, draw });
        self
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            commands: self.commands,
        }
    }
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The built-in vocabulary: `circle`, `line`, `rect`, `clear`.
    pub fn standard() -> Self {
        Self::standard_builder().build()
    }

    /// Builder pre-populated with the built-in vocabulary, for extension.
    pub fn standard_builder() -> RegistryBuilder {
        Self::builder()
            .register("circle", Space::Logical, circle)
            .register("line", Space::Logical, line)
            .register("rect", Space::Logical, rect)
            .register("clear", Space::Pixel, clear)
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run `cmd` against `surface`.
    ///
    /// Logical-space commands run under a `save`/`scale`/`restore` bracket so
    /// the surface transform is unchanged afterwards.
    pub fn execute(
        &self,
        surface: &mut dyn DrawSurface,
        cmd: &DrawCommand,
        logical: LogicalSize,
    ) -> Result<(), CanvasError> {
        let spec = self
            .get(&cmd.function)
            .ok_or_else(|| CanvasError::UnknownCommand(cmd.function.clone()))?;

        match spec.space {
            Space::Logical => {
                let (sx, sy) = logical.scale_for(surface.pixel_size());
                trace!(command = %cmd.function, sx, sy, "Executing draw command");
                surface.save();
                surface.scale(sx, sy);
                (spec.draw)(&mut *surface, cmd);
                surface.restore();
            }
            Space::Pixel => {
                trace!(command = %cmd.function, "Executing unscaled draw command");
                (spec.draw)(&mut *surface, cmd);
            }
        }
        Ok(())
    }
}

fn num(cmd: &DrawCommand, key: &str) -> f64 {
    cmd.number(key).unwrap_or(0.0)
}

/// Circle of diameter `d` centred on `(x, y)`.
fn circle(surface: &mut dyn DrawSurface, cmd: &DrawCommand) {
    surface.begin_path();
    surface.arc(num(cmd, "x"), num(cmd, "y"), num(cmd, "d") / 2.0, 0.0, TAU);
    surface.stroke();
}

fn line(surface: &mut dyn DrawSurface, cmd: &DrawCommand) {
    surface.begin_path();
    surface.move_to(num(cmd, "x1"), num(cmd, "y1"));
    surface.line_to(num(cmd, "x2"), num(cmd, "y2"));
    surface.stroke();
}

/// Rectangle with top-left corner `(x, y)`.
fn rect(surface: &mut dyn DrawSurface, cmd: &DrawCommand) {
    surface.begin_path();
    surface.rect(num(cmd, "x"), num(cmd, "y"), num(cmd, "w"), num(cmd, "h"));
    surface.stroke();
}

/// Clears the whole surface; arguments are ignored.
fn clear(surface: &mut dyn DrawSurface, _cmd: &DrawCommand) {
    let (width, height) = surface.pixel_size();
    surface.clear_rect(0.0, 0.0, width, height);
}
