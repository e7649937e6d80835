//! Routes decoded server messages to the editor's sinks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use livecode_canvas::{CommandRegistry, LogicalSize};
use livecode_core::ServerMessage;

use crate::sinks::Sinks;

/// Duration the built-in `play` handler passes to the audio sink.
pub const DEFAULT_NOTE_DURATION: &str = "8n";

/// Handles one message kind the router has no built-in behaviour for.
pub trait ExtensionHandler: Send {
    fn handle(&mut self, message: &ServerMessage, sinks: &mut Sinks);
}

impl<F> ExtensionHandler for F
where
    F: FnMut(&ServerMessage, &mut Sinks) + Send,
{
    fn handle(&mut self, message: &ServerMessage, sinks: &mut Sinks) {
        self(message, sinks)
    }
}

/// Triggers a note on the audio sink for each `play` message.
#[derive(Debug, Clone)]
pub struct PlayHandler {
    duration: String,
}

impl Default for PlayHandler {
    fn default() -> Self {
        Self {
            duration: DEFAULT_NOTE_DURATION.to_string(),
        }
    }
}

impl PlayHandler {
    pub fn with_duration(duration: impl Into<String>) -> Self {
        Self {
            duration: duration.into(),
        }
    }
}

impl ExtensionHandler for PlayHandler {
    fn handle(&mut self, message: &ServerMessage, sinks: &mut Sinks) {
        let ServerMessage::Play { note } = message else {
            return;
        };
        if let Some(audio) = sinks.audio.as_mut() {
            audio.trigger(note, &self.duration);
        }
    }
}

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    /// The sink this message targets is not attached.
    NoSink,
    UnknownCommand,
    /// No built-in behaviour and no extension handler for this kind.
    Unhandled,
}

pub struct OutputRouter {
    commands: Arc<CommandRegistry>,
    logical: LogicalSize,
    extensions: HashMap<String, Box<dyn ExtensionHandler>>,
}

impl OutputRouter {
    /// A router with no extension handlers.
    pub fn new(commands: Arc<CommandRegistry>, logical: LogicalSize) -> Self {
        Self {
            commands,
            logical,
            extensions: HashMap::new(),
        }
    }

    /// Standard draw commands, a 300x300 logical space and the `play` handler.
    pub fn standard() -> Self {
        Self::new(Arc::new(CommandRegistry::standard()), LogicalSize::default())
            .with_extension("play", PlayHandler::default())
    }

    pub fn with_logical_size(mut self, logical: LogicalSize) -> Self {
        self.logical = logical;
        self
    }

    pub fn with_extension(mut self, kind: &str, handler: impl ExtensionHandler + 'static) -> Self {
        self.register(kind, handler);
        self
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: &str, handler: impl ExtensionHandler + 'static) {
        self.extensions.insert(kind.to_string(), Box::new(handler));
    }

    pub fn logical_size(&self) -> LogicalSize {
        self.logical
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Apply one message to `sinks`.
    pub fn dispatch(&mut self, message: &ServerMessage, sinks: &mut Sinks) -> Dispatch {
        match message {
            ServerMessage::Write { data, .. } => match sinks.text.as_mut() {
                Some(text) => {
                    text.append(data);
                    Dispatch::Applied
                }
                None => Dispatch::NoSink,
            },
            ServerMessage::Draw(cmd) => {
                let Some(canvas) = sinks.canvas.as_mut() else {
                    return Dispatch::NoSink;
                };
                match self.commands.execute(&mut **canvas, cmd, self.logical) {
                    Ok(()) => Dispatch::Applied,
                    Err(e) => {
                        debug!(%e, "Dropping draw command");
                        Dispatch::UnknownCommand
                    }
                }
            }
            other => match self.extensions.get_mut(other.kind()) {
                Some(handler) => {
                    handler.handle(other, sinks);
                    Dispatch::Applied
                }
                None => {
                    trace!(kind = other.kind(), "No handler for message");
                    Dispatch::Unhandled
                }
            },
        }
    }
}

impl std::fmt::Debug for OutputRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.extensions.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("OutputRouter")
            .field("commands", &self.commands.names())
            .field("logical", &self.logical)
            .field("extensions", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use livecode_canvas::{RecordingSurface, Shape};
    use livecode_core::DrawCommand;
    use serde_json::json;

    fn write(data: &str) -> ServerMessage {
        ServerMessage::Write {
            data: data.to_string(),
            file: None,
        }
    }

    #[test]
    fn test_write_appends_verbatim() {
        let output = Arc::new(Mutex::new(String::new()));
        let mut sinks = Sinks::new().with_text(output.clone());
        let mut router = OutputRouter::standard();

        assert_eq!(router.dispatch(&write("hello"), &mut sinks), Dispatch::Applied);
        assert_eq!(router.dispatch(&write("hello"), &mut sinks), Dispatch::Applied);
        assert_eq!(router.dispatch(&write(""), &mut sinks), Dispatch::Applied);
        assert_eq!(*output.lock().unwrap(), "hellohello");
    }

    #[test]
    fn test_draw_circle_scales_to_canvas() {
        let canvas = Arc::new(Mutex::new(RecordingSurface::new(600.0, 600.0)));
        let mut sinks = Sinks::new().with_canvas(canvas.clone());
        let mut router = OutputRouter::standard();

        let cmd = DrawCommand::new("circle").arg("x", 150).arg("y", 150).arg("d", 60);
        assert_eq!(
            router.dispatch(&ServerMessage::Draw(cmd), &mut sinks),
            Dispatch::Applied
        );

        let canvas = canvas.lock().unwrap();
        match canvas.shapes() {
            [Shape::Arc { cx, cy, rx, ry, .. }] => {
                assert_eq!((*cx, *cy), (300.0, 300.0));
                assert_eq!((*rx * 2.0, *ry * 2.0), (120.0, 120.0));
            }
            other => panic!("unexpected shapes: {other:?}"),
        }
        assert_eq!(canvas.save_depth(), 0);
    }

    #[test]
    fn test_unknown_draw_command_is_dropped() {
        let canvas = Arc::new(Mutex::new(RecordingSurface::new(600.0, 600.0)));
        let mut sinks = Sinks::new().with_canvas(canvas.clone());
        let mut router = OutputRouter::standard();

        let msg = ServerMessage::Draw(DrawCommand::new("triangle"));
        assert_eq!(router.dispatch(&msg, &mut sinks), Dispatch::UnknownCommand);
        assert!(canvas.lock().unwrap().shapes().is_empty());
    }

    #[test]
    fn test_missing_sink_drops_message() {
        let mut sinks = Sinks::new();
        let mut router = OutputRouter::standard();

        assert_eq!(router.dispatch(&write("x"), &mut sinks), Dispatch::NoSink);
        let draw = ServerMessage::Draw(DrawCommand::new("clear"));
        assert_eq!(router.dispatch(&draw, &mut sinks), Dispatch::NoSink);
        let play = ServerMessage::Play {
            note: "C4".into(),
        };
        assert_eq!(router.dispatch(&play, &mut sinks), Dispatch::Applied);
    }

    #[test]
    fn test_play_triggers_audio_with_default_duration() {
        let notes = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
        let mut sinks = Sinks::new().with_audio(notes.clone());
        let mut router = OutputRouter::standard();

        let play = ServerMessage::Play {
            note: "C4".into(),
        };
        router.dispatch(&play, &mut sinks);
        assert_eq!(
            *notes.lock().unwrap(),
            vec![("C4".to_string(), "8n".to_string())]
        );
    }

    #[test]
    fn test_unregistered_kind_is_unhandled() {
        let mut sinks = Sinks::new();
        let mut router = OutputRouter::new(
            Arc::new(CommandRegistry::standard()),
            LogicalSize::default(),
        );

        let play = ServerMessage::Play {
            note: "C4".into(),
        };
        assert_eq!(router.dispatch(&play, &mut sinks), Dispatch::Unhandled);

        let other = ServerMessage::Other {
            kind: "sparkle".into(),
            payload: json!({"msgtype": "sparkle"}),
        };
        assert_eq!(router.dispatch(&other, &mut sinks), Dispatch::Unhandled);
    }

    #[test]
    fn test_closure_extension_handler() {
        let output = Arc::new(Mutex::new(String::new()));
        let mut sinks = Sinks::new().with_text(output.clone());
        let mut router = OutputRouter::standard().with_extension(
            "debug",
            |msg: &ServerMessage, sinks: &mut Sinks| {
                if let (ServerMessage::Debug { message }, Some(text)) = (msg, sinks.text.as_mut()) {
                    text.append(&format!("[debug] {message}\n"));
                }
            },
        );

        let msg = ServerMessage::Debug {
            message: "step".into(),
        };
        assert_eq!(router.dispatch(&msg, &mut sinks), Dispatch::Applied);
        assert_eq!(*output.lock().unwrap(), "[debug] step\n");
    }
}
