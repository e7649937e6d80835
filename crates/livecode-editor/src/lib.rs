//! Editor controller and output routing.
//!
//! An [`EditorController`] owns at most one live session at a time. Messages
//! from that session are handed to the [`OutputRouter`], which applies them
//! to the controller's [`Sinks`]; messages from superseded sessions are
//! discarded.

pub mod controller;
pub mod router;
pub mod sinks;

pub use controller::{EditorController, EditorEvent, EditorOptions, Hook, RunOutcome, SourceProvider};
pub use router::{Dispatch, ExtensionHandler, OutputRouter, PlayHandler};
pub use sinks::{AudioSink, Sinks, TextSink};
