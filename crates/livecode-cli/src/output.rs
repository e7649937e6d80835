//! Terminal sinks for the `run` command.

use std::io::Write;

use tracing::debug;

use livecode_editor::{AudioSink, TextSink};

/// Writes run output straight through to a terminal stream.
pub struct TerminalSink<W> {
    out: W,
}

impl TerminalSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TextSink for TerminalSink<W> {
    fn append(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush()) {
            debug!(%e, "Terminal write failed");
        }
    }

    // Terminal output is append-only.
    fn clear(&mut self) {}
}

/// Reports notes on stderr; the CLI has no audio device.
#[derive(Debug, Default)]
pub struct NoteLog {
    played: usize,
}

impl NoteLog {
    pub fn played(&self) -> usize {
        self.played
    }
}

impl AudioSink for NoteLog {
    fn trigger(&mut self, note: &str, duration: &str) {
        self.played += 1;
        eprintln!("[play] {note} ({duration})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_sink_appends_verbatim() {
        let mut sink = TerminalSink::new(Vec::new());
        sink.append("hello");
        sink.append(" <b>world</b>\n");
        sink.clear();
        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "hello <b>world</b>\n"
        );
    }

    #[test]
    fn test_note_log_counts() {
        let mut log = NoteLog::default();
        log.trigger("C4", "8n");
        log.trigger("E4", "8n");
        assert_eq!(log.played(), 2);
    }
}
