//! The editor controller: one run at a time, output applied to sinks.
//!
//! Every session's events arrive tagged with its id. Only events from the
//! currently active session reach the router; anything from a superseded
//! session is discarded, so a late message can never touch the sinks after
//! `run`, `stop` or `reset` replaced its session.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use livecode_core::{AuxFile, ClientFrame, Config, LiveCodeError, Result, RunRequest, ServerMessage};
use livecode_session::{
    CloseReason, Connector, Session, SessionEvent, SessionId, SessionOptions,
};

use crate::router::{Dispatch, OutputRouter};
use crate::sinks::Sinks;

/// How long a superseded session gets to close before its driver is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Supplies the program text at the moment a run starts.
pub trait SourceProvider: Send {
    fn code(&self) -> String;
}

impl SourceProvider for String {
    fn code(&self) -> String {
        self.clone()
    }
}

impl SourceProvider for &'static str {
    fn code(&self) -> String {
        (*self).to_string()
    }
}

/// A buffer the host keeps editing while the controller reads from it.
impl SourceProvider for Arc<Mutex<String>> {
    fn code(&self) -> String {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Lifecycle points a host can attach callbacks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    BeforeRun,
    Clear,
    Reset,
}

type HookFn = Box<dyn FnMut(&mut Sinks) + Send>;

/// Where and how runs are executed.
#[derive(Debug, Clone)]
pub struct EditorOptions {
    pub target: String,
    pub runtime: String,
    pub code_filename: Option<String>,
    pub files: Vec<AuxFile>,
    pub env: BTreeMap<String, String>,
    pub session: SessionOptions,
}

impl EditorOptions {
    pub fn new(target: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            runtime: runtime.into(),
            code_filename: None,
            files: Vec::new(),
            env: BTreeMap::new(),
            session: SessionOptions::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            session: SessionOptions::from(&config.session),
            ..Self::new(config.server.livecode_url(), config.runtime())
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

    fn request(&self, code: String) -> RunRequest {
        RunRequest {
            runtime: self.runtime.clone(),
            code,
            code_filename: self.code_filename.clone(),
            files: self.files.clone(),
            env: self.env.clone(),
            command: Vec::new(),
        }
    }
}

/// Something that happened to the active run.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    Opened {
        session_id: SessionId,
    },
    Message {
        session_id: SessionId,
        message: ServerMessage,
        dispatch: Dispatch,
    },
    Ended {
        session_id: SessionId,
        outcome: RunOutcome,
    },
}

/// How a run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub reason: CloseReason,
    /// The last `exitstatus` the backend reported, if any.
    pub exit_status: Option<i64>,
}

pub struct EditorController {
    connector: Arc<dyn Connector>,
    options: EditorOptions,
    source: Box<dyn SourceProvider>,
    router: OutputRouter,
    sinks: Sinks,
    hooks: HashMap<Hook, Vec<HookFn>>,
    session: Option<Session>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    exit_status: Option<i64>,
}

impl EditorController {
    /// An idle controller with an empty source, no sinks and the standard router.
    pub fn new(connector: Arc<dyn Connector>, options: EditorOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            options,
            source: Box::new(String::new()),
            router: OutputRouter::standard(),
            sinks: Sinks::default(),
            hooks: HashMap::new(),
            session: None,
            events_tx,
            events_rx,
            exit_status: None,
        }
    }

    pub fn with_source(mut self, source: impl SourceProvider + 'static) -> Self {
        self.set_source(source);
        self
    }

    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_router(mut self, router: OutputRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_hook(mut self, hook: Hook, f: impl FnMut(&mut Sinks) + Send + 'static) -> Self {
        self.add_hook(hook, f);
        self
    }

    pub fn set_source(&mut self, source: impl SourceProvider + 'static) {
        self.source = Box::new(source);
    }

    pub fn add_hook(&mut self, hook: Hook, f: impl FnMut(&mut Sinks) + Send + 'static) {
        self.hooks.entry(hook).or_default().push(Box::new(f));
    }

    pub fn options(&self) -> &EditorOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut EditorOptions {
        &mut self.options
    }

    pub fn router_mut(&mut self) -> &mut OutputRouter {
        &mut self.router
    }

    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    pub fn sinks_mut(&mut self) -> &mut Sinks {
        &mut self.sinks
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// True while a session is live and its end has not been observed.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// The exit status reported by the current or most recent run.
    pub fn exit_status(&self) -> Option<i64> {
        self.exit_status
    }

    /// Start a run of the current source, closing any previous session first.
    pub async fn run(&mut self) -> SessionId {
        self.fire(Hook::BeforeRun);
        self.stop().await;

        let request = self.options.request(self.source.code());
        self.exit_status = None;
        let session = Session::open(
            self.connector.clone(),
            self.options.target.clone(),
            request,
            self.options.session.clone(),
            self.events_tx.clone(),
        );
        let id = session.id();
        info!(session_id = %id, "Run started");
        self.session = Some(session);
        id
    }

    /// Close the active session, if any. Its remaining events are discarded.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(session_id = %session.id(), "Stopping session");
            session.shutdown(CLOSE_GRACE).await;
        }
    }

    /// Invoke the clear hooks. The session is left alone.
    pub fn clear(&mut self) {
        self.fire(Hook::Clear);
    }

    /// Stop any run, then invoke the reset hooks.
    pub async fn reset(&mut self) {
        self.stop().await;
        self.exit_status = None;
        self.fire(Hook::Reset);
    }

    /// Send an extra frame to the active session.
    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        match &self.session {
            Some(session) => session.send(frame),
            None => Err(LiveCodeError::Session("no active session".into())),
        }
    }

    /// Wait for the next event of the active run and apply it to the sinks.
    ///
    /// Returns `None` once the controller is idle and nothing is pending.
    pub async fn next_event(&mut self) -> Option<EditorEvent> {
        loop {
            let event = if self.session.is_some() {
                self.events_rx.recv().await?
            } else {
                self.events_rx.try_recv().ok()?
            };
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    /// Drive the active run until it ends.
    pub async fn run_to_completion(&mut self) -> Option<RunOutcome> {
        while let Some(event) = self.next_event().await {
            if let EditorEvent::Ended { outcome, .. } = event {
                return Some(outcome);
            }
        }
        None
    }

    fn apply(&mut self, event: SessionEvent) -> Option<EditorEvent> {
        let active = self.session.as_ref().map(Session::id);
        if active != Some(event.session_id()) {
            debug!(session_id = %event.session_id(), "Discarding event from superseded session");
            return None;
        }

        match event {
            SessionEvent::Opened { session_id } => Some(EditorEvent::Opened { session_id }),
            SessionEvent::Message {
                session_id,
                message,
            } => {
                if let ServerMessage::ExitStatus { code } = &message {
                    self.exit_status = Some(*code);
                }
                let dispatch = self.router.dispatch(&message, &mut self.sinks);
                Some(EditorEvent::Message {
                    session_id,
                    message,
                    dispatch,
                })
            }
            SessionEvent::Closed { session_id, reason } => {
                self.session = None;
                info!(session_id = %session_id, ?reason, exit_status = ?self.exit_status, "Run ended");
                Some(EditorEvent::Ended {
                    session_id,
                    outcome: RunOutcome {
                        reason,
                        exit_status: self.exit_status,
                    },
                })
            }
        }
    }

    fn fire(&mut self, hook: Hook) {
        if let Some(callbacks) = self.hooks.get_mut(&hook) {
            for callback in callbacks.iter_mut() {
                callback(&mut self.sinks);
            }
        }
    }
}

impl std::fmt::Debug for EditorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorController")
            .field("options", &self.options)
            .field("router", &self.router)
            .field("sinks", &self.sinks)
            .field("session", &self.session)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}
