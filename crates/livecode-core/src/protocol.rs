//! LiveCode wire protocol.
//!
//! Every frame is a JSON object discriminated by a `msgtype` field. The client
//! sends exactly one `exec` frame per connection; the backend answers with a
//! stream of [`ServerMessage`]s and closes the connection when the run ends.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Path of the streaming endpoint on a LiveCode server.
pub const LIVECODE_PATH: &str = "/livecode";

/// Path of the one-shot HTTP exec endpoint.
pub const EXEC_PATH: &str = "/exec";

/// Path prefix of the per-runtime plain-text endpoint (`/runtimes/{runtime}`).
pub const RUNTIMES_PATH: &str = "/runtimes";

/// An auxiliary file shipped alongside the main source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxFile {
    pub filename: String,
    pub contents: String,
}

impl AuxFile {
    pub fn new(filename: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            contents: contents.into(),
        }
    }
}

/// A request to execute source code in a named runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub runtime: String,
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_filename: Option<String>,

    /// Extra files, in the order the backend should materialize them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<AuxFile>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Optional argument vector overriding the runtime's default command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl RunRequest {
    pub fn new(runtime: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file: AuxFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Client -> server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msgtype", rename_all = "snake_case")]
pub enum ClientFrame {
    Exec(RunRequest),
    Ping,
    Quit,
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Encode the `exec` frame for a run.
pub fn encode_run_request(
    runtime: &str,
    source: &str,
    files: &[AuxFile],
    env: &BTreeMap<String, String>,
) -> Result<String, serde_json::Error> {
    ClientFrame::Exec(RunRequest {
        runtime: runtime.to_string(),
        code: source.to_string(),
        files: files.to_vec(),
        env: env.clone(),
        ..Default::default()
    })
    .encode()
}

/// A named drawing command with its raw arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub function: String,
    pub args: Map<String, Value>,
}

impl DrawCommand {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Map::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// Numeric argument, accepting numbers or numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.args.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One decoded unit of the backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Text to append to the console. `file` names the stream (stdout/stderr).
    Write { data: String, file: Option<String> },
    Draw(DrawCommand),
    Play { note: String },
    Welcome { message: String },
    Pong,
    Goodbye,
    Debug { message: String },
    ExitStatus { code: i64 },
    Error { error: String },
    /// A kind this client does not model. Routed by name to extension handlers.
    Other { kind: String, payload: Value },
}

impl ServerMessage {
    pub fn kind(&self) -> &str {
        match self {
            Self::Write { .. } => "write",
            Self::Draw(_) => "draw",
            Self::Play { .. } => "play",
            Self::Welcome { .. } => "welcome",
            Self::Pong => "pong",
            Self::Goodbye => "goodbye",
            Self::Debug { .. } => "debug",
            Self::ExitStatus { .. } => "exitstatus",
            Self::Error { .. } => "error",
            Self::Other { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no msgtype/kind discriminator")]
    MissingKind,

    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{kind}` message is missing `{field}`")]
    MissingField { kind: String, field: &'static str },
}

#[derive(Deserialize)]
struct WritePayload {
    data: String,
    #[serde(default)]
    file: Option<String>,
}

#[derive(Deserialize)]
struct DrawPayload {
    #[serde(default)]
    cmd: Option<Map<String, Value>>,
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct PlayPayload {
    #[serde(default)]
    cmd: Option<Map<String, Value>>,
    #[serde(default)]
    note: Option<Value>,
}

#[derive(Deserialize)]
struct TextPayload {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ExitStatusPayload {
    exitstatus: i64,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: String,
}

/// Decode one inbound frame.
///
/// Unknown kinds decode to [`ServerMessage::Other`]; only structurally broken
/// frames are errors.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = obj
        .get("msgtype")
        .and_then(Value::as_str)
        .or_else(|| obj.get("kind").and_then(Value::as_str))
        .map(str::to_owned)
        .ok_or(DecodeError::MissingKind)?;

    let msg = match kind.as_str() {
        "write" => {
            let p: WritePayload = payload(&kind, obj)?;
            ServerMessage::Write {
                data: p.data,
                file: p.file,
            }
        }
        "draw" => ServerMessage::Draw(decode_draw(&kind, payload(&kind, obj)?)?),
        "play" => {
            let p: PlayPayload = payload(&kind, obj)?;
            let note = p
                .cmd
                .and_then(|mut cmd| cmd.remove("note"))
                .or(p.note)
                .and_then(note_text)
                .ok_or_else(|| DecodeError::MissingField {
                    kind: kind.clone(),
                    field: "note",
                })?;
            ServerMessage::Play { note }
        }
        "welcome" => ServerMessage::Welcome {
            message: payload::<TextPayload>(&kind, obj)?.message,
        },
        "debug" => ServerMessage::Debug {
            message: payload::<TextPayload>(&kind, obj)?.message,
        },
        "pong" => ServerMessage::Pong,
        "goodbye" => ServerMessage::Goodbye,
        "exitstatus" => ServerMessage::ExitStatus {
            code: payload::<ExitStatusPayload>(&kind, obj)?.exitstatus,
        },
        "error" => ServerMessage::Error {
            error: payload::<ErrorPayload>(&kind, obj)?.error,
        },
        _ => ServerMessage::Other {
            kind,
            payload: Value::Object(obj),
        },
    };
    Ok(msg)
}

fn payload<T: DeserializeOwned>(kind: &str, obj: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(obj)).map_err(|source| DecodeError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

fn decode_draw(kind: &str, p: DrawPayload) -> Result<DrawCommand, DecodeError> {
    let missing = || DecodeError::MissingField {
        kind: kind.to_string(),
        field: "function",
    };

    // Either `{cmd: {function, ...args}}` or `{function, args}`.
    if let Some(mut cmd) = p.cmd {
        let function = match cmd.remove("function") {
            Some(Value::String(f)) => f,
            _ => return Err(missing()),
        };
        return Ok(DrawCommand {
            function,
            args: cmd,
        });
    }

    Ok(DrawCommand {
        function: p.function.ok_or_else(missing)?,
        args: p.args.unwrap_or_default(),
    })
}

fn note_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
