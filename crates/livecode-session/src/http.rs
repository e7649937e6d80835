//! One-shot execution over the server's HTTP endpoints.
//!
//! `/exec` takes a JSON run request and streams the run's output as plain
//! text, or one JSON message per line when raw output is requested.
//! `/runtimes/{runtime}` takes the code as a plain-text body, with env and
//! arguments in `X-Falcon-*` headers, and answers with the whole output plus
//! the exit status and elapsed time in response headers.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::Serialize;
use tracing::debug;

use livecode_core::config::ServerConfig;
use livecode_core::protocol::{EXEC_PATH, RUNTIMES_PATH};
use livecode_core::{LiveCodeError, Result, RunRequest};

/// Stream of decoded UTF-8 text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

const ENV_HEADER: &str = "X-Falcon-Env";
const MODE_HEADER: &str = "X-Falcon-Mode";
const ARGS_HEADER: &str = "X-Falcon-Args";
const EXIT_STATUS_HEADER: &str = "X-Falcon-Exit-Status";
const TIME_TAKEN_HEADER: &str = "X-Falcon-Time-Taken";

#[derive(Serialize)]
struct ExecBody<'a> {
    #[serde(flatten)]
    request: &'a RunRequest,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    raw_output: bool,
}

/// Extras for a `/runtimes/{runtime}` call.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Sent as space-separated `KEY=VALUE` pairs; neither side may contain
    /// whitespace.
    pub env: BTreeMap<String, String>,
    /// Exposed to the program as `FALCON_MODE`.
    pub mode: Option<String>,
    /// Replaces the runtime's default command.
    pub args: Vec<String>,
}

/// Result of a `/runtimes/{runtime}` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOutput {
    pub output: String,
    /// `None` when the header is missing or the run never reported a status.
    pub exit_status: Option<i64>,
    pub time_taken: Option<Duration>,
}

/// Client for the non-interactive HTTP endpoints.
#[derive(Debug, Clone)]
pub struct ExecClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExecClient {
    /// `base_url` is the server's HTTP root, e.g. `http://localhost:8010`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(server.http_base())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn exec_url(&self) -> String {
        format!("{}{EXEC_PATH}", self.base_url)
    }

    pub fn runtime_url(&self, runtime: &str) -> String {
        format!("{}{RUNTIMES_PATH}/{runtime}", self.base_url)
    }

    /// POST the request and stream the response body.
    pub async fn exec(&self, request: &RunRequest, raw_output: bool) -> Result<TextStream> {
        let url = self.exec_url();
        debug!(%url, runtime = %request.runtime, raw_output, "Posting exec request");

        let resp = self
            .http
            .post(&url)
            .json(&ExecBody {
                request,
                raw_output,
            })
            .send()
            .await
            .map_err(|e| LiveCodeError::Transport(e.to_string()))?;
        let resp = check_status(resp, "exec").await?;

        let body = Box::pin(resp.bytes_stream());
        let stream = futures::stream::unfold(Some((body, Vec::<u8>::new())), |state| async move {
            let (mut body, mut pending) = state?;
            match body.next().await {
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    let text = take_utf8(&mut pending);
                    Some((Ok(text), Some((body, pending))))
                }
                Some(Err(e)) => Some((Err(LiveCodeError::Transport(e.to_string())), None)),
                None if pending.is_empty() => None,
                // A sequence cut off by the end of the body.
                None => Some((Ok(String::from_utf8_lossy(&pending).into_owned()), None)),
            }
        });
        Ok(Box::pin(stream))
    }

    /// Run to completion and return the whole output.
    pub async fn exec_to_string(&self, request: &RunRequest) -> Result<String> {
        let mut stream = self.exec(request, false).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?);
        }
        Ok(output)
    }

    /// POST `code` to `/runtimes/{runtime}` and wait for the whole output.
    pub async fn run_runtime(
        &self,
        runtime: &str,
        code: &str,
        options: &RuntimeOptions,
    ) -> Result<RuntimeOutput> {
        let url = self.runtime_url(runtime);
        debug!(%url, args = options.args.len(), "Posting runtime request");

        let mut req = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(code.to_string());
        if !options.env.is_empty() {
            req = req.header(ENV_HEADER, env_header(&options.env)?);
        }
        if let Some(mode) = &options.mode {
            req = req.header(MODE_HEADER, mode.as_str());
        }
        if !options.args.is_empty() {
            req = req.header(ARGS_HEADER, shell_words::join(&options.args));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LiveCodeError::Transport(e.to_string()))?;
        let resp = check_status(resp, "runtime").await?;

        let exit_status = header_value(resp.headers(), EXIT_STATUS_HEADER)
            .and_then(|v| v.parse::<i64>().ok());
        let time_taken = header_value(resp.headers(), TIME_TAKEN_HEADER)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        let output = resp
            .text()
            .await
            .map_err(|e| LiveCodeError::Transport(e.to_string()))?;

        debug!(?exit_status, ?time_taken, "Runtime request finished");
        Ok(RuntimeOutput {
            output,
            exit_status,
            time_taken,
        })
    }
}

async fn check_status(resp: reqwest::Response, endpoint: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(LiveCodeError::Transport(format!(
        "{endpoint} endpoint returned {status}: {body}"
    )))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Encode env as `K=V K=V`. The server splits on whitespace, so pairs that
/// would not survive the split are rejected.
fn env_header(env: &BTreeMap<String, String>) -> Result<String> {
    let mut pairs = Vec::with_capacity(env.len());
    for (key, value) in env {
        if key.is_empty() || key.contains('=') || key.contains(char::is_whitespace) {
            return Err(LiveCodeError::InvalidRequest(format!(
                "invalid env name `{key}`"
            )));
        }
        if value.contains(char::is_whitespace) {
            return Err(LiveCodeError::InvalidRequest(format!(
                "env value for `{key}` contains whitespace"
            )));
        }
        pairs.push(format!("{key}={value}"));
    }
    Ok(pairs.join(" "))
}

/// Split off the longest valid UTF-8 prefix, keeping an incomplete trailing
/// sequence for the next chunk. Invalid bytes are replaced.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = pending.split_off(valid);
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}
