//! Console capture: append-only buffer, live sink fan-out and the legacy
//! error-marker matcher.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamTag {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLine {
    pub tag: StreamTag,
    pub text: String,
}

/// Live delivery target for already-redacted console lines.
pub trait ConsoleSink: Send + Sync {
    fn line(&self, tag: StreamTag, text: &str);
}

/// Sink that discards every line.
pub struct NullSink;

impl ConsoleSink for NullSink {
    fn line(&self, _tag: StreamTag, _text: &str) {}
}

/// Append-only in-memory console log.
///
/// Single writer (the executing task), any number of readers; readers see a
/// monotonically growing sequence via [`ConsoleBuffer::snapshot`].
#[derive(Debug, Default)]
pub struct ConsoleBuffer {
    lines: Mutex<Vec<ConsoleLine>>,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, tag: StreamTag, text: &str) {
        self.lines.lock().unwrap().push(ConsoleLine {
            tag,
            text: text.to_string(),
        });
    }

    pub fn snapshot(&self) -> Vec<ConsoleLine> {
        self.lines.lock().unwrap().clone()
    }

    /// Full console text, one line per entry.
    pub fn text(&self) -> String {
        let lines = self.lines.lock().unwrap();
        lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The last `n` lines joined with newlines.
    pub fn tail(&self, n: usize) -> String {
        let lines = self.lines.lock().unwrap();
        let start = lines.len().saturating_sub(n);
        lines[start..]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Legacy failure heuristic: flags the build the moment any configured
/// marker substring appears in the combined console stream. Kept for
/// compatibility with older tool configurations; substring-only, not
/// extended to patterns.
#[derive(Debug, Default)]
pub struct ErrorMarker {
    markers: Vec<String>,
    matched: Mutex<Option<String>>,
}

impl ErrorMarker {
    pub fn new(markers: Vec<String>) -> Self {
        Self {
            markers: markers.into_iter().filter(|m| !m.is_empty()).collect(),
            matched: Mutex::new(None),
        }
    }

    pub fn observe(&self, line: &str) {
        if self.markers.is_empty() {
            return;
        }
        let mut matched = self.matched.lock().unwrap();
        if matched.is_some() {
            return;
        }
        if let Some(marker) = self.markers.iter().find(|m| line.contains(m.as_str())) {
            *matched = Some(marker.clone());
        }
    }

    /// The first marker that matched, if any.
    pub fn matched(&self) -> Option<String> {
        self.matched.lock().unwrap().clone()
    }
}
