//! Core types, wire protocol, errors, and configuration for LiveCode.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Config;
pub use error::{LiveCodeError, Result};
pub use protocol::{AuxFile, ClientFrame, DecodeError, DrawCommand, RunRequest, ServerMessage};
